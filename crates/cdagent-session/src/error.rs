//! Error types for the build session layer.

use std::path::PathBuf;

/// Failure of a single builder.
///
/// Messages never include command arguments or environment values, only
/// program names and paths, so they are safe to print to the console.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("command '{program}' exited with {}", describe_exit(.exit_code))]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
    },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running '{program}': {source}")]
    Process {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{program}' timed out after {timeout_secs} seconds")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("{op} failed for {}: {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to clean {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Explicit(String),
}

impl BuildError {
    pub(crate) fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Exit code of a failed command, if the failure came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BuildError::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Errors produced while reading session configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}
