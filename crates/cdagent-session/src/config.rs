//! Session configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable holding the default working directory.
pub const WORKING_DIR_VAR: &str = "CDAGENT_WORKING_DIR";

/// Environment variable holding the default command timeout in seconds.
pub const COMMAND_TIMEOUT_VAR: &str = "CDAGENT_COMMAND_TIMEOUT_SECS";

/// Knobs applied to every builder a session executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Working directory for commands that don't set one. `None` inherits
    /// the agent process's current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Default per-command timeout in seconds (0 = no timeout).
    #[serde(default)]
    pub command_timeout_secs: u64,
}

impl SessionConfig {
    /// Read configuration from `CDAGENT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let working_dir = lookup(WORKING_DIR_VAR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let command_timeout_secs = match lookup(COMMAND_TIMEOUT_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: COMMAND_TIMEOUT_VAR,
                    value: raw.clone(),
                })?,
            None => 0,
        };

        Ok(Self {
            working_dir,
            command_timeout_secs,
        })
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }
}
