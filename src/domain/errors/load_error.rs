//! Load failure taxonomy.

use thiserror::Error;

/// Terminal failure of a load, delivered to every subscriber of the key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("image is not cached and the policy forbids network access")]
    NotCached,

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("decode error: {message}")]
    DecodeError { message: String },

    #[error("deadline exceeded")]
    Timeout,
}

impl LoadError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeError {
            message: message.into(),
        }
    }

    /// Short machine-readable reason, as forwarded to `onError`.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotCached => "NotCached",
            Self::NetworkError { .. } => "NetworkError",
            Self::DecodeError { .. } => "DecodeError",
            Self::Timeout => "Timeout",
        }
    }

    /// Returns whether a caller-driven retry could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(LoadError::NotCached.reason(), "NotCached");
        assert_eq!(LoadError::network("x").reason(), "NetworkError");
        assert_eq!(LoadError::decode("x").reason(), "DecodeError");
        assert_eq!(LoadError::Timeout.reason(), "Timeout");
    }

    #[test]
    fn test_retryable() {
        assert!(LoadError::network("reset").is_retryable());
        assert!(LoadError::Timeout.is_retryable());
        assert!(!LoadError::NotCached.is_retryable());
        assert!(!LoadError::decode("bad").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LoadError::network("HTTP 404").to_string(),
            "network error: HTTP 404"
        );
    }
}
