//! Error types shared across mailload crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed properties line {line}: {reason}")]
    MalformedProperty { line: usize, reason: String },

    #[error("Missing required property: {0}")]
    MissingProperty(String),

    #[error("Invalid value for property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },
}
