//! Engine construction errors.

use thiserror::Error;

use super::{CacheError, LoadError};

/// Errors raised while building an `ImageEngine`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The disk store could not be opened.
    #[error("failed to open disk cache: {0}")]
    Cache(#[from] CacheError),
    /// The network client could not be created.
    #[error("failed to create fetcher: {0}")]
    Fetcher(#[from] LoadError),
}
