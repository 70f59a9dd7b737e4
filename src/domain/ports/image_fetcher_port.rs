//! Port definition for network image retrieval.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::HttpValidators;
use crate::domain::errors::LoadError;

/// Progress callback: bytes received so far, expected total if known.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// A single network retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute uri.
    pub uri: String,
    /// Caller-supplied headers.
    pub headers: BTreeMap<String, String>,
    /// Stored validators for a conditional request.
    pub conditional: Option<HttpValidators>,
}

/// Result of a successful retrieval.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Full body received.
    Fetched {
        /// Encoded image bytes.
        bytes: Bytes,
        /// Validators of the response.
        validators: HttpValidators,
    },
    /// The origin confirmed the stored copy (`304`).
    NotModified {
        /// Validators of the `304` response.
        validators: HttpValidators,
    },
}

/// Port for fetching encoded image bytes.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Retrieves `request.uri`, reporting progress as chunks arrive.
    ///
    /// Transport failures and non-2xx statuses map to `LoadError::NetworkError`.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressFn,
    ) -> Result<FetchOutcome, LoadError>;
}
