//! Job files: a material to sync plus the tasks to run afterwards.
//!
//! ```toml
//! working_dir = "work"
//!
//! [material]
//! type = "p4"
//! server_and_port = "perforce:1666"
//! user_name = "cd-agent"
//! view = "//depot/app/... //ws/..."
//!
//! [revision]
//! latest = "2"
//!
//! [[tasks]]
//! kind = "exec"
//! program = "make"
//! args = ["test"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cdagent_materials::{Material, RevisionContext};
use cdagent_session::Builder;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    /// Pipeline working directory. Relative paths resolve against the job
    /// file's directory.
    pub working_dir: PathBuf,

    #[serde(default)]
    pub material: Option<Material>,

    #[serde(default)]
    pub revision: Option<RevisionContext>,

    /// Per-command timeout override in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    #[serde(default)]
    pub tasks: Vec<Builder>,
}

impl JobFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid job file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        let mut job = Self::parse(&text).with_context(|| format!("In {}", path.display()))?;
        if job.working_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            job.working_dir = base.join(&job.working_dir);
        }
        Ok(job)
    }

    /// Directory tasks run in: the material destination, or the working
    /// directory when there is no material.
    pub fn task_dir(&self) -> Result<PathBuf> {
        match &self.material {
            Some(material) => Ok(material.destination(&self.working_dir)?),
            None => Ok(self.working_dir.clone()),
        }
    }

    /// Sync (if any) followed by the tasks, as one tree.
    pub fn to_tree(&self) -> Result<Builder> {
        let mut steps = Vec::new();

        match (&self.material, &self.revision) {
            (Some(material), Some(revision)) => {
                let sync = cdagent_materials::update_to(material, &self.working_dir, revision)
                    .context("Invalid material")?;
                steps.push(sync);
            }
            (Some(_), None) => bail!("Job declares a [material] but no [revision]"),
            (None, Some(_)) => bail!("Job declares a [revision] but no [material]"),
            (None, None) => steps.push(Builder::mkdirs(&self.working_dir)),
        }

        let task_dir = self.task_dir()?;
        let tasks: Vec<Builder> = self
            .tasks
            .iter()
            .cloned()
            .map(|t| t.with_default_working_dir(&task_dir))
            .collect();
        if !tasks.is_empty() {
            steps.push(Builder::compose(tasks).describe("tasks"));
        }

        Ok(Builder::compose(steps).describe("job"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdagent_session::BuilderKind;

    const JOB: &str = r#"
        working_dir = "/var/lib/cdagent/up42"

        [material]
        type = "git"
        url = "https://git.example.com/app.git"
        folder = "app"

        [revision]
        latest = "a1b2c3"

        [[tasks]]
        kind = "exec"
        program = "make"
        args = ["test"]

        [[tasks]]
        kind = "exec"
        program = "make"
        working_dir = "/elsewhere"
    "#;

    #[test]
    fn test_parse_job() {
        let job = JobFile::parse(JOB).unwrap();
        assert_eq!(job.tasks.len(), 2);
        assert_eq!(job.revision.unwrap().latest.as_str(), "a1b2c3");
        assert!(matches!(job.material, Some(Material::Git(_))));
    }

    #[test]
    fn test_tasks_default_to_material_destination() {
        let job = JobFile::parse(JOB).unwrap();
        let tree = job.to_tree().unwrap();

        let BuilderKind::Compose { children, .. } = &tree.kind else {
            panic!("expected compose");
        };
        assert_eq!(children.len(), 2);
        let BuilderKind::Compose { children: tasks, .. } = &children[1].kind else {
            panic!("expected tasks compose");
        };
        let dirs: Vec<_> = tasks
            .iter()
            .map(|t| match &t.kind {
                BuilderKind::Exec(spec) => spec.working_dir.clone().unwrap(),
                other => panic!("unexpected task {other:?}"),
            })
            .collect();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/var/lib/cdagent/up42/app"),
                PathBuf::from("/elsewhere")
            ]
        );
    }

    #[test]
    fn test_material_requires_revision() {
        let job = JobFile::parse(
            r#"
            working_dir = "/w"
            [material]
            type = "svn"
            url = "svn://svn/trunk"
            "#,
        )
        .unwrap();
        let err = job.to_tree().unwrap_err();
        assert!(err.to_string().contains("no [revision]"));
    }

    #[test]
    fn test_tasks_only_job() {
        let job = JobFile::parse(
            r#"
            working_dir = "/w"
            [[tasks]]
            kind = "echo"
            text = "hello"
            "#,
        )
        .unwrap();
        assert_eq!(
            job.to_tree().unwrap().outline(),
            vec!["job", "  mkdirs /w", "  tasks", "    echo"]
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(JobFile::parse("working_dir = \"/w\"\nworkdir = \"/x\"").is_err());
    }

    #[test]
    fn test_load_resolves_relative_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(&path, "working_dir = \"work\"\n").unwrap();

        let job = JobFile::load(&path).unwrap();
        assert_eq!(job.working_dir, dir.path().join("work"));
    }
}
