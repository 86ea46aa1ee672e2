//! cdagent material synchronization
//!
//! Turns a [`Material`] and a [`RevisionContext`] into a [`Builder`] tree
//! that brings a working directory to exactly that revision. Nothing runs
//! here; the tree is executed by a `cdagent_session::BuildSession`.
//!
//! ```no_run
//! use std::path::Path;
//! use cdagent_materials::{update_to, GitMaterial, Material, RevisionContext};
//! use cdagent_session::{BuildSession, ConsoleSink};
//!
//! # async fn sync() -> Result<(), Box<dyn std::error::Error>> {
//! let material = Material::Git(GitMaterial::new("https://git.example.com/app.git"));
//! let tree = update_to(&material, Path::new("/var/lib/cdagent/up42"), &RevisionContext::new("a1b2c3"))?;
//! let result = BuildSession::new(ConsoleSink::new()).build(tree).await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod git;
pub mod material;
pub mod mercurial;
pub mod perforce;
pub mod revision;
pub mod subversion;

use std::path::Path;

use cdagent_session::Builder;

pub use error::{MaterialError, Result};
pub use material::{
    validate_folder, GitMaterial, Material, MercurialMaterial, Password, PerforceMaterial,
    SubversionMaterial,
};
pub use revision::{Revision, RevisionContext};

/// Build the tree that synchronizes `material` into `working_dir` (or its
/// configured sub-folder) at `ctx.latest`.
///
/// Configuration problems are reported here, before anything executes.
pub fn update_to(material: &Material, working_dir: &Path, ctx: &RevisionContext) -> Result<Builder> {
    let dest = material.destination(working_dir)?;
    match material {
        Material::Perforce(m) => perforce::update_to(m, &dest, ctx),
        Material::Git(m) => git::update_to(m, &dest, ctx),
        Material::Mercurial(m) => mercurial::update_to(m, &dest, ctx),
        Material::Subversion(m) => subversion::update_to(m, &dest, ctx),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use cdagent_session::{Builder, BuilderKind};

    fn walk<'a>(node: &'a Builder, out: &mut Vec<&'a BuilderKind>) {
        out.push(&node.kind);
        match &node.kind {
            BuilderKind::Compose { children, cleanup } => {
                for child in children.iter().chain(cleanup) {
                    walk(child, out);
                }
            }
            BuilderKind::Conditional {
                then, otherwise, ..
            } => {
                walk(then, out);
                if let Some(branch) = otherwise {
                    walk(branch, out);
                }
            }
            _ => {}
        }
    }

    fn nodes(tree: &Builder) -> Vec<&BuilderKind> {
        let mut out = Vec::new();
        walk(tree, &mut out);
        out
    }

    /// Command lines of every exec leaf, in tree order.
    pub fn commands(tree: &Builder) -> Vec<String> {
        nodes(tree)
            .into_iter()
            .filter_map(|k| match k {
                BuilderKind::Exec(spec) => Some(spec.command_line()),
                _ => None,
            })
            .collect()
    }

    /// `(name, value, secret)` of every export leaf.
    pub fn exports(tree: &Builder) -> Vec<(String, String, bool)> {
        nodes(tree)
            .into_iter()
            .filter_map(|k| match k {
                BuilderKind::Export {
                    name,
                    value,
                    secret,
                } => Some((name.clone(), value.clone(), *secret)),
                _ => None,
            })
            .collect()
    }

    pub fn echoes(tree: &Builder) -> Vec<String> {
        nodes(tree)
            .into_iter()
            .filter_map(|k| match k {
                BuilderKind::Echo { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}
