//! `reqwest`-backed network fetcher.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use tracing::{debug, trace};

use crate::domain::entities::HttpValidators;
use crate::domain::errors::LoadError;
use crate::domain::ports::{FetchOutcome, FetchRequest, ImageFetcherPort, ProgressFn};

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("fastimage/", env!("CARGO_PKG_VERSION"));

// Content-Length is untrusted input
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Fetches images over HTTP(S), streaming the body to report progress.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher. A zero `timeout` disables the per-request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, LoadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10));
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| LoadError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn validators_from(headers: &HeaderMap) -> HttpValidators {
    HttpValidators::from_headers(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        Utc::now(),
    )
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressFn,
    ) -> Result<FetchOutcome, LoadError> {
        let mut builder = self.client.get(&request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(conditional) = &request.conditional {
            if let Some(etag) = &conditional.etag {
                builder = builder.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &conditional.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LoadError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED && request.conditional.is_some() {
            debug!(uri = %request.uri, "Not modified");
            return Ok(FetchOutcome::NotModified {
                validators: validators_from(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(LoadError::network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let validators = validators_from(response.headers());
        let total = response.content_length();
        let capacity = total.map_or(0, |t| usize::try_from(t.min(MAX_PREALLOCATION)).unwrap_or(0));
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LoadError::network(format!("Failed to read body: {e}")))?;
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, total);
        }

        trace!(uri = %request.uri, size = body.len(), "Download complete");
        Ok(FetchOutcome::Fetched {
            bytes: body.freeze(),
            validators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validators_from_response_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", "\"abc\"".parse().unwrap());
        headers.insert("cache-control", "max-age=60".parse().unwrap());

        let validators = validators_from(&headers);
        assert_eq!(validators.etag.as_deref(), Some("\"abc\""));
        assert!(validators.is_fresh(Utc::now()));
    }

    #[test]
    fn test_zero_timeout_builds_client() {
        assert!(HttpImageFetcher::new(DEFAULT_USER_AGENT, Duration::ZERO).is_ok());
    }
}
