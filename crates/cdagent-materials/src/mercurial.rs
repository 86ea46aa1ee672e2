//! Mercurial: clone once, pull the branch, update cleanly and purge.

use std::path::Path;

use cdagent_session::{Builder, Condition, ExecSpec};
use tracing::debug;

use crate::error::Result;
use crate::material::{done_banner, require, start_banner, url_with_credentials, MercurialMaterial};
use crate::revision::RevisionContext;

/// Sync tree for a Mercurial material. `.hg` survives the purge.
pub fn update_to(material: &MercurialMaterial, dest: &Path, ctx: &RevisionContext) -> Result<Builder> {
    require(&material.url, "mercurial", "url")?;
    require(&material.branch, "mercurial", "branch")?;

    let auth = url_with_credentials(
        &material.url,
        material.username.as_deref(),
        material.password.as_ref(),
    );
    let hg = || ExecSpec::new(&material.hg_binary).current_dir(dest);

    debug!(dest = %dest.display(), revision = %ctx.latest, "generating mercurial sync");

    let mut steps = vec![start_banner(dest, ctx, &material.url), Builder::mkdirs(dest)];
    steps.extend(auth.secrets.iter().map(Builder::secret));

    // -R keeps hg from walking up into an enclosing repository.
    let default_path_matches = Condition::OutputEquals {
        exec: ExecSpec::new(&material.hg_binary)
            .arg("-R")
            .arg(dest.display().to_string())
            .args(["paths", "default"])
            .current_dir(dest),
        expected: auth.url.clone(),
    };
    let clone = Builder::compose(vec![
        Builder::clean_dir(dest, Vec::<String>::new()),
        Builder::exec(
            hg().args(["clone", "--noupdate", "-b", material.branch.as_str()])
                .args([auth.url.as_str(), "."]),
        )
        .describe(format!("hg clone {}", material.url)),
    ]);
    steps.push(
        Builder::when(
            default_path_matches,
            Builder::echo(format!("[cdagent] Reusing existing checkout in {}", dest.display())),
        )
        .otherwise(clone),
    );

    steps.extend([
        Builder::exec(hg().args(["pull", "-b", material.branch.as_str(), auth.url.as_str()]))
            .describe(format!("hg pull -b {} {}", material.branch, material.url)),
        Builder::exec(hg().args(["update", "--clean", "-r", ctx.latest.as_str()])),
        Builder::exec(hg().args(["--config", "extensions.purge=", "purge", "--all"])),
        done_banner(),
    ]);

    Ok(Builder::compose(steps).describe(format!("update mercurial material {}", material.url)))
}
