use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CrabbitError {
    #[error("malformed input in {artifact}: {reason}")]
    MalformedInput { artifact: String, reason: String },

    #[error("something unexpected happened in {artifact}: {reason}")]
    #[diagnostic(help(
        "the platform returned data that breaks an assumed contract; no output was written"
    ))]
    InvariantViolation { artifact: String, reason: String },

    #[error("cannot merge {artifact}: {reason}")]
    #[diagnostic(help("inputs disagree on a shared identity; nothing was written"))]
    MergeConflict { artifact: String, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("{0} is not a valid project item URL")]
    InvalidProjectItemUrl(String),

    #[error("unsupported project item type: {0}")]
    #[diagnostic(help(
        "only the \"Calibration\" and \"ComputationalModel\" item types can be downloaded"
    ))]
    UnsupportedItemType(String),

    #[error("{0}")]
    Download(String),

    #[error("missing credential: {0}")]
    #[diagnostic(help(
        "set it in crabbit.json or through the matching JINKO_* environment variable"
    ))]
    MissingCredential(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("platform request failed: {0}")]
    ApiHttp(String),

    #[error("platform returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl CrabbitError {
    pub fn malformed(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}
