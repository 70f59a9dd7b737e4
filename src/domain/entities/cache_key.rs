//! Stable cache identity for requested images.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CachePolicy;

/// Opaque, stable identifier for a cached image.
/// Derived from a hash of the canonical uri; headers never participate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `uri` under `policy`.
    ///
    /// `Immutable` and `CacheOnly` key on the uri without query string or
    /// fragment. `Web` keeps the query string, since HTTP treats it as part
    /// of the resource identity.
    #[must_use]
    pub fn derive(uri: &str, policy: CachePolicy) -> Self {
        let canonical = canonical_uri(uri, policy);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Rebuilds a key from its string form, e.g. a disk file stem.
    /// Returns `None` if `raw` is not a 32-char lowercase hex digest.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonical_uri(uri: &str, policy: CachePolicy) -> &str {
    let uri = uri.trim();
    let without_fragment = uri.split_once('#').map_or(uri, |(head, _)| head);
    match policy {
        CachePolicy::Web => without_fragment,
        CachePolicy::Immutable | CachePolicy::CacheOnly => without_fragment
            .split_once('?')
            .map_or(without_fragment, |(head, _)| head),
    }
}
