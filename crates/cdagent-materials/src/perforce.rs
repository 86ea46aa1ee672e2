//! Perforce: client workspace generation and `p4 sync`.
//!
//! Perforce keeps its checkout state on the server, so the destination holds
//! no control metadata. Each sync recreates the client spec, empties the
//! destination and force-syncs the whole view.

use std::path::Path;

use cdagent_session::{Builder, ExecSpec};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MaterialError, Result};
use crate::material::{done_banner, require, start_banner, PerforceMaterial};
use crate::revision::RevisionContext;

/// Client workspace name for a destination directory.
///
/// Stable for a given path and distinct across paths, so agents sharing a
/// Perforce server never clobber each other's workspaces.
pub fn client_name(dest: &Path) -> String {
    let base: String = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let base = if base.is_empty() { "root".to_string() } else { base };

    let digest = Sha256::digest(dest.to_string_lossy().as_bytes());
    format!("cdagent-{base}-{}", &hex::encode(digest)[..16])
}

/// Split a view line into tokens, honouring double quotes around paths that
/// contain spaces.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn quote(path: &str) -> String {
    if path.contains(char::is_whitespace) {
        format!("\"{path}\"")
    } else {
        path.to_string()
    }
}

/// Rewrite the client side of every view mapping to `//<client>/...`.
///
/// `//depot/a/... //anything/a/...` becomes `//depot/a/... //<client>/a/...`.
/// Exclusion (`-`) and overlay (`+`) prefixes on the depot side are kept.
pub fn rewrite_view(view: &str, client: &str) -> Result<Vec<String>> {
    let mut mappings = Vec::new();

    for line in view.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let invalid = |reason| MaterialError::InvalidView {
            line: line.to_string(),
            reason,
        };

        let tokens = tokenize(line);
        let [depot, client_path] = tokens.as_slice() else {
            return Err(invalid("expected a depot path and a client path"));
        };

        let depot_path = depot.trim_start_matches(&['-', '+'][..]);
        if !depot_path.starts_with("//") {
            return Err(invalid("depot path must start with '//'"));
        }

        let Some(rest) = client_path.strip_prefix("//") else {
            return Err(invalid("client path must start with '//'"));
        };
        let Some((_, tail)) = rest.split_once('/') else {
            return Err(invalid("client path must name a path below the client root"));
        };

        mappings.push(format!(
            "{} {}",
            quote(depot),
            quote(&format!("//{client}/{tail}"))
        ));
    }

    if mappings.is_empty() {
        return Err(MaterialError::InvalidView {
            line: String::new(),
            reason: "view is empty",
        });
    }
    Ok(mappings)
}

/// Client spec fed to `p4 client -i`.
pub fn client_spec(client: &str, root: &Path, view: &[String]) -> String {
    let mut spec = format!(
        "Client: {client}\n\n\
         Description:\n\tCreated by cdagent.\n\n\
         Root: {}\n\n\
         Options: clobber rmdir\n\n\
         LineEnd: local\n\n\
         View:\n",
        root.display()
    );
    for mapping in view {
        spec.push('\t');
        spec.push_str(mapping);
        spec.push('\n');
    }
    spec
}

/// Sync tree for a Perforce material.
pub fn update_to(material: &PerforceMaterial, dest: &Path, ctx: &RevisionContext) -> Result<Builder> {
    require(&material.server_and_port, "perforce", "server_and_port")?;
    require(&material.view, "perforce", "view")?;

    let client = client_name(dest);
    let view = rewrite_view(&material.view, &client)?;
    let p4 = || ExecSpec::new(&material.p4_binary).current_dir(dest);
    let password = material.password.as_ref().filter(|p| !p.is_empty());

    debug!(client = %client, dest = %dest.display(), revision = %ctx.latest, "generating perforce sync");

    let mut steps = vec![
        start_banner(dest, ctx, &material.server_and_port),
        Builder::mkdirs(dest),
        Builder::export("P4PORT", &material.server_and_port),
    ];
    if let Some(user) = material.user_name.as_deref().filter(|u| !u.is_empty()) {
        steps.push(Builder::export("P4USER", user));
    }
    steps.push(Builder::export("P4CLIENT", &client));
    if let Some(password) = password {
        steps.push(Builder::export_secret("P4PASSWD", password.expose()));
        if material.use_tickets {
            steps.push(
                Builder::exec(p4().arg("login").stdin(format!("{}\n", password.expose())))
                    .describe("p4 login"),
            );
        }
    }
    steps.extend([
        Builder::exec(
            p4().args(["client", "-i"])
                .stdin(client_spec(&client, dest, &view)),
        )
        .describe(format!("p4 client -i ({client})")),
        Builder::clean_dir(dest, Vec::<String>::new()),
        Builder::exec(p4().args(["sync", "-f"]).arg(format!("//{client}/...@{}", ctx.latest))),
        done_banner(),
    ]);

    Ok(Builder::compose(steps).describe(format!("update perforce material {}", material.server_and_port)))
}
