//! Revisions and the context a sync is asked to reach.

use serde::{Deserialize, Serialize};

/// Opaque revision identifier: a changelist number, commit hash, changeset id
/// or svn revision. Never parsed or ordered here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Revision {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn one() -> u32 {
    1
}

/// Target revision plus what is known about the changes leading up to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionContext {
    /// Revision the working directory must end up at.
    pub latest: Revision,

    /// Oldest revision of the modifications that triggered this build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<Revision>,

    /// Number of modifications between `oldest` and `latest`.
    #[serde(default = "one")]
    pub modifications: u32,
}

impl RevisionContext {
    pub fn new(latest: impl Into<Revision>) -> Self {
        Self {
            latest: latest.into(),
            oldest: None,
            modifications: 1,
        }
    }

    pub fn with_oldest(mut self, oldest: impl Into<Revision>, modifications: u32) -> Self {
        self.oldest = Some(oldest.into());
        self.modifications = modifications;
        self
    }

    /// History depth a shallow clone needs so that `oldest` and its parent
    /// are present.
    pub fn fetch_depth(&self) -> u32 {
        self.modifications.saturating_add(1)
    }
}
