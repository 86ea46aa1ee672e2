//! Builder tree: the executable steps of a build session.
//!
//! A [`Builder`] is one node: a leaf action (run a command, touch the
//! filesystem, export a variable) or a composite of ordered children. Trees
//! are plain data; [`crate::BuildSession`] interprets them.
//!
//! Trees can be written by hand, produced by a material command generator, or
//! deserialized from a job file:
//!
//! ```toml
//! [[tasks]]
//! kind = "export"
//! name = "RUST_LOG"
//! value = "debug"
//!
//! [[tasks]]
//! kind = "exec"
//! program = "make"
//! args = ["test"]
//! description = "run unit tests"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A single invocation of an external program.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Defaults to the session working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Written to the child's stdin, then stdin is closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,

    /// Overrides the session-wide command timeout. Zero disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ExecSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdin: None,
            timeout_secs: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// `program arg1 arg2 ...`, for labels. Secrets are masked by the caller.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for ExecSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // stdin may carry a password (`p4 login`), so only its presence shows.
        f.debug_struct("ExecSpec")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field("working_dir", &self.working_dir)
            .field("stdin", &self.stdin.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Predicate evaluated when a [`BuilderKind::Conditional`] node runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum Condition {
    /// The path exists.
    Exists { path: PathBuf },

    /// The path does not exist.
    Missing { path: PathBuf },

    /// The command exits successfully and its trimmed stdout equals `expected`.
    /// Output is not written to the console.
    OutputEquals { exec: ExecSpec, expected: String },
}

/// What a builder does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuilderKind {
    /// Run an external program, streaming its output into the console.
    Exec(ExecSpec),

    /// Create a directory and its parents.
    Mkdirs { path: PathBuf },

    /// Delete a file or directory tree. Missing paths are fine.
    Delete { path: PathBuf },

    /// Delete every entry of `path` except the names in `keep`.
    CleanDir {
        path: PathBuf,
        #[serde(default)]
        keep: Vec<String>,
    },

    /// Copy a single file.
    Copy { from: PathBuf, to: PathBuf },

    /// Install an environment variable for subsequent commands.
    Export {
        name: String,
        value: String,
        #[serde(default)]
        secret: bool,
    },

    /// Mask a value in all console output without exporting it.
    Secret { value: String },

    /// Append a line to the console.
    Echo { text: String },

    /// Fail the build with a message.
    Fail { message: String },

    /// Run children in order, stopping at the first failure. `cleanup`
    /// children always run afterwards.
    Compose {
        #[serde(default)]
        children: Vec<Builder>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleanup: Vec<Builder>,
    },

    /// Run `then` if the condition holds, otherwise `otherwise` (if any).
    Conditional {
        condition: Condition,
        then: Box<Builder>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Builder>>,
    },
}

/// A node of the builder tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    #[serde(flatten)]
    pub kind: BuilderKind,

    /// Human readable label used in step records and logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Runs if the session is cancelled while this node executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_cancel: Option<Box<Builder>>,
}

impl From<BuilderKind> for Builder {
    fn from(kind: BuilderKind) -> Self {
        Self {
            kind,
            description: None,
            on_cancel: None,
        }
    }
}

impl From<ExecSpec> for Builder {
    fn from(spec: ExecSpec) -> Self {
        BuilderKind::Exec(spec).into()
    }
}

impl Builder {
    pub fn exec(spec: ExecSpec) -> Self {
        spec.into()
    }

    pub fn mkdirs(path: impl Into<PathBuf>) -> Self {
        BuilderKind::Mkdirs { path: path.into() }.into()
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        BuilderKind::Delete { path: path.into() }.into()
    }

    pub fn clean_dir<I, S>(path: impl Into<PathBuf>, keep: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BuilderKind::CleanDir {
            path: path.into(),
            keep: keep.into_iter().map(Into::into).collect(),
        }
        .into()
    }

    pub fn copy(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        BuilderKind::Copy {
            from: from.into(),
            to: to.into(),
        }
        .into()
    }

    pub fn export(name: impl Into<String>, value: impl Into<String>) -> Self {
        BuilderKind::Export {
            name: name.into(),
            value: value.into(),
            secret: false,
        }
        .into()
    }

    pub fn export_secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        BuilderKind::Export {
            name: name.into(),
            value: value.into(),
            secret: true,
        }
        .into()
    }

    pub fn secret(value: impl Into<String>) -> Self {
        BuilderKind::Secret {
            value: value.into(),
        }
        .into()
    }

    pub fn echo(text: impl Into<String>) -> Self {
        BuilderKind::Echo { text: text.into() }.into()
    }

    pub fn fail(message: impl Into<String>) -> Self {
        BuilderKind::Fail {
            message: message.into(),
        }
        .into()
    }

    pub fn compose(children: Vec<Builder>) -> Self {
        BuilderKind::Compose {
            children,
            cleanup: Vec::new(),
        }
        .into()
    }

    pub fn when(condition: Condition, then: Builder) -> Self {
        BuilderKind::Conditional {
            condition,
            then: Box::new(then),
            otherwise: None,
        }
        .into()
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn on_cancel(mut self, handler: Builder) -> Self {
        self.on_cancel = Some(Box::new(handler));
        self
    }

    /// Add a cleanup child. Only meaningful on composites; on any other node
    /// the builder is wrapped in a composite first.
    pub fn with_cleanup(self, cleanup_step: Builder) -> Self {
        match self.kind {
            BuilderKind::Compose {
                children,
                mut cleanup,
            } => {
                cleanup.push(cleanup_step);
                Builder {
                    kind: BuilderKind::Compose { children, cleanup },
                    description: self.description,
                    on_cancel: self.on_cancel,
                }
            }
            _ => Builder::compose(vec![self]).with_cleanup(cleanup_step),
        }
    }

    /// Branch taken when a conditional's predicate does not hold.
    pub fn otherwise(mut self, branch: Builder) -> Self {
        if let BuilderKind::Conditional { otherwise, .. } = &mut self.kind {
            *otherwise = Some(Box::new(branch));
        }
        self
    }

    /// Short label: the description if set, otherwise derived from the kind.
    ///
    /// Labels can contain secrets (e.g. a password on a command line); mask
    /// them through the console before showing them anywhere.
    pub fn label(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.kind {
            BuilderKind::Exec(spec) => spec.command_line(),
            BuilderKind::Mkdirs { path } => format!("mkdirs {}", path.display()),
            BuilderKind::Delete { path } => format!("delete {}", path.display()),
            BuilderKind::CleanDir { path, .. } => format!("clean {}", path.display()),
            BuilderKind::Copy { from, to } => {
                format!("copy {} to {}", from.display(), to.display())
            }
            BuilderKind::Export { name, .. } => format!("export {name}"),
            BuilderKind::Secret { .. } => "secret".to_string(),
            BuilderKind::Echo { .. } => "echo".to_string(),
            BuilderKind::Fail { message } => format!("fail: {message}"),
            BuilderKind::Compose { children, .. } => format!("compose ({} steps)", children.len()),
            BuilderKind::Conditional { condition, .. } => match condition {
                Condition::Exists { path } => format!("if exists {}", path.display()),
                Condition::Missing { path } => format!("if missing {}", path.display()),
                Condition::OutputEquals { exec, .. } => format!("if `{}` matches", exec.command_line()),
            },
        }
    }

    /// Every secret value declared anywhere in the tree, including plain
    /// exports that override a variable exported as secret earlier on.
    pub fn secrets(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut secret_names = Vec::new();
        self.collect_secrets(&mut out, &mut secret_names);
        out
    }

    fn collect_secrets(&self, out: &mut Vec<String>, secret_names: &mut Vec<String>) {
        match &self.kind {
            BuilderKind::Export {
                name,
                value,
                secret,
            } => {
                if *secret && !secret_names.contains(name) {
                    secret_names.push(name.clone());
                }
                if secret_names.contains(name) {
                    out.push(value.clone());
                }
            }
            BuilderKind::Secret { value } => out.push(value.clone()),
            BuilderKind::Compose { children, cleanup } => {
                for child in children.iter().chain(cleanup) {
                    child.collect_secrets(out, secret_names);
                }
            }
            BuilderKind::Conditional {
                then, otherwise, ..
            } => {
                then.collect_secrets(out, secret_names);
                if let Some(branch) = otherwise {
                    branch.collect_secrets(out, secret_names);
                }
            }
            _ => {}
        }
        if let Some(handler) = &self.on_cancel {
            handler.collect_secrets(out, secret_names);
        }
    }

    /// Indented, one-line-per-node plan of the tree. Not masked.
    pub fn outline(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.outline_into(0, &mut lines);
        lines
    }

    fn outline_into(&self, depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        lines.push(format!("{indent}{}", self.label()));
        match &self.kind {
            BuilderKind::Compose { children, cleanup } => {
                for child in children {
                    child.outline_into(depth + 1, lines);
                }
                if !cleanup.is_empty() {
                    lines.push(format!("{indent}  finally:"));
                    for step in cleanup {
                        step.outline_into(depth + 2, lines);
                    }
                }
            }
            BuilderKind::Conditional {
                then, otherwise, ..
            } => {
                then.outline_into(depth + 1, lines);
                if let Some(branch) = otherwise {
                    lines.push(format!("{indent}  else:"));
                    branch.outline_into(depth + 2, lines);
                }
            }
            _ => {}
        }
        if let Some(handler) = &self.on_cancel {
            lines.push(format!("{indent}  on cancel:"));
            handler.outline_into(depth + 2, lines);
        }
    }

    /// Fill in `dir` as the working directory of every command that has none.
    pub fn with_default_working_dir(mut self, dir: &Path) -> Self {
        self.apply_default_working_dir(dir);
        self
    }

    fn apply_default_working_dir(&mut self, dir: &Path) {
        match &mut self.kind {
            BuilderKind::Exec(spec) => {
                if spec.working_dir.is_none() {
                    spec.working_dir = Some(dir.to_path_buf());
                }
            }
            BuilderKind::Compose { children, cleanup } => {
                for child in children.iter_mut().chain(cleanup.iter_mut()) {
                    child.apply_default_working_dir(dir);
                }
            }
            BuilderKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if let Condition::OutputEquals { exec, .. } = condition {
                    if exec.working_dir.is_none() {
                        exec.working_dir = Some(dir.to_path_buf());
                    }
                }
                then.apply_default_working_dir(dir);
                if let Some(branch) = otherwise {
                    branch.apply_default_working_dir(dir);
                }
            }
            _ => {}
        }
        if let Some(handler) = &mut self.on_cancel {
            handler.apply_default_working_dir(dir);
        }
    }
}
