//! Errors raised while generating a synchronization tree.
//!
//! These are configuration problems found before anything runs. Failures of
//! the SCM tools themselves surface later, as a failed build.

/// Invalid material configuration.
#[derive(Debug, thiserror::Error)]
pub enum MaterialError {
    #[error("{material} material is missing required field '{field}'")]
    MissingField {
        material: &'static str,
        field: &'static str,
    },

    #[error("invalid destination folder '{folder}': {reason}")]
    InvalidFolder { folder: String, reason: &'static str },

    #[error("invalid perforce view line '{line}': {reason}")]
    InvalidView { line: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, MaterialError>;
