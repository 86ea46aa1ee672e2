//! Subversion: checkout once, then clean, revert and update in place.

use std::path::Path;

use cdagent_session::{Builder, Condition, ExecSpec};
use tracing::debug;

use crate::error::Result;
use crate::material::{done_banner, require, start_banner, SubversionMaterial};
use crate::revision::RevisionContext;

/// Options shared by every network operation.
fn network_args(material: &SubversionMaterial) -> Vec<String> {
    let mut args = vec!["--non-interactive".to_string(), "--no-auth-cache".to_string()];
    if let Some(user) = material.username.as_deref().filter(|u| !u.is_empty()) {
        args.extend(["--username".to_string(), user.to_string()]);
    }
    if let Some(password) = material.password.as_ref().filter(|p| !p.is_empty()) {
        args.extend(["--password".to_string(), password.expose().to_string()]);
    }
    if !material.check_externals {
        args.push("--ignore-externals".to_string());
    }
    args
}

/// Sync tree for a Subversion material. `.svn` survives the cleanup.
pub fn update_to(material: &SubversionMaterial, dest: &Path, ctx: &RevisionContext) -> Result<Builder> {
    require(&material.url, "subversion", "url")?;

    let url = material.url.trim_end_matches('/');
    let svn = || ExecSpec::new(&material.svn_binary).current_dir(dest);
    let network = network_args(material);
    let revision = ctx.latest.as_str();

    debug!(dest = %dest.display(), revision = %ctx.latest, "generating subversion sync");

    let mut steps = vec![start_banner(dest, ctx, &material.url), Builder::mkdirs(dest)];
    if let Some(password) = material.password.as_ref().filter(|p| !p.is_empty()) {
        steps.push(Builder::secret(password.expose()));
    }

    let url_matches = Condition::OutputEquals {
        exec: ExecSpec::new(&material.svn_binary)
            .args(["info", "--show-item", "url", "--non-interactive"])
            .arg(dest.display().to_string())
            .current_dir(dest),
        expected: url.to_string(),
    };
    let update = Builder::compose(vec![
        Builder::exec(svn().args(["cleanup", "--remove-unversioned", "--remove-ignored", "."])),
        Builder::exec(svn().args(["revert", "--recursive", "."])),
        Builder::exec(
            svn().args(["update", "-r", revision])
                .args(network.iter().cloned())
                .arg("."),
        )
        .describe(format!("svn update -r {revision}")),
    ]);
    let checkout = Builder::compose(vec![
        Builder::clean_dir(dest, Vec::<String>::new()),
        Builder::exec(
            svn().args(["checkout", "-r", revision])
                .args(network.iter().cloned())
                .args([url, "."]),
        )
        .describe(format!("svn checkout -r {revision} {url}")),
    ]);
    steps.push(Builder::when(url_matches, update).otherwise(checkout));
    steps.push(done_banner());

    Ok(Builder::compose(steps).describe(format!("update subversion material {}", material.url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Password;
    use crate::testutil::commands;

    #[test]
    fn test_update_tree() {
        let m = SubversionMaterial::new("svn://svn.example.com/app/trunk/");
        let tree = update_to(&m, Path::new("/w"), &RevisionContext::new("1234")).unwrap();

        assert_eq!(
            commands(&tree),
            vec![
                "svn cleanup --remove-unversioned --remove-ignored .",
                "svn revert --recursive .",
                "svn update -r 1234 --non-interactive --no-auth-cache --ignore-externals .",
                "svn checkout -r 1234 --non-interactive --no-auth-cache --ignore-externals svn://svn.example.com/app/trunk .",
            ]
        );
    }

    #[test]
    fn test_externals_and_credentials() {
        let mut m = SubversionMaterial::new("https://svn.example.com/app/trunk");
        m.check_externals = true;
        m.username = Some("dave".to_string());
        m.password = Some(Password::new("letmein"));

        let tree = update_to(&m, Path::new("/w"), &RevisionContext::new("5")).unwrap();
        let cmds = commands(&tree);

        assert!(cmds.iter().all(|c| !c.contains("--ignore-externals")));
        assert!(cmds[2].contains("--username dave --password letmein"));
        assert_eq!(tree.secrets(), vec!["letmein"]);
        assert!(!tree.outline().join("\n").contains("letmein"));
    }
}
