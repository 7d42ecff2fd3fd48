//! Error types for the ingest pipeline
//!
//! [`IngestError`] is the run-level taxonomy. [`DecodeError`] is kept apart
//! because a bad attachment only costs that attachment: the orchestrator logs
//! it and moves on, while every other variant ends the run.

use mailload_common::CommonError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Run-level errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Credentials are missing, expired, or rejected by the mail service
    #[error("Authentication failed: {0}. Refresh the stored token and re-run.")]
    Auth(String),

    /// Connection, environment, or table settings are missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The bulk-load session failed; extracted files are left in the workspace
    #[error("Load failed: {0}")]
    Load(String),

    /// The message source returned something unusable
    #[error("Message source error: {0}")]
    Source(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Another run owns the workspace
    #[error("Another run is in progress (lock file '{}'). Remove it only if no run is active.", .0.display())]
    RunInProgress(PathBuf),

    #[error("IO error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn message_source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<CommonError> for IngestError {
    fn from(err: CommonError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Per-attachment decode and extraction failures
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid base64url: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("payload is not a readable zip archive: {0}")]
    InvalidArchive(#[from] zip::result::ZipError),

    #[error("archive must contain exactly one file, found {0}")]
    UnexpectedMemberCount(usize),

    #[error("extracted file already exists: {}", .0.display())]
    NameCollision(PathBuf),

    #[error("failed to extract into '{}': {source}", path.display())]
    Extract {
        path: PathBuf,
        source: std::io::Error,
    },
}
