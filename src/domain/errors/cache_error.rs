//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during a store operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Entry metadata could not be (de)serialized.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
