//! Cache entries and HTTP cache validators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CacheKey;

/// A single entry owned by one store.
#[derive(Debug, Clone)]
pub struct CacheEntry<P> {
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// Encoded bytes (disk) or decoded bitmap (memory).
    pub payload: P,
    /// Size accounted against the store budget.
    pub size_bytes: u64,
    /// Last time the entry was read or written.
    pub last_access: DateTime<Utc>,
    /// HTTP validators, present for entries fetched under the `Web` policy.
    pub validators: Option<HttpValidators>,
}

impl<P> CacheEntry<P> {
    /// Creates an entry accessed now.
    #[must_use]
    pub fn new(key: CacheKey, payload: P, size_bytes: u64) -> Self {
        Self {
            key,
            payload,
            size_bytes,
            last_access: Utc::now(),
            validators: None,
        }
    }

    /// Attaches HTTP validators.
    #[must_use]
    pub fn with_validators(mut self, validators: Option<HttpValidators>) -> Self {
        self.validators = validators;
        self
    }

    /// Refreshes the access timestamp.
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }
}

/// How `Web`-policy disk hits are checked against the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevalidationMode {
    /// Serve fresh entries, conditionally revalidate stale ones.
    #[default]
    Standard,
    /// Conditionally revalidate every disk hit.
    Always,
    /// Never revalidate a cached entry.
    Never,
}

impl fmt::Display for RevalidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl FromStr for RevalidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown revalidation mode: {other}")),
        }
    }
}

/// HTTP cache validators and freshness information of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpValidators {
    /// `ETag` header.
    pub etag: Option<String>,
    /// `Last-Modified` header, verbatim.
    pub last_modified: Option<String>,
    /// When the response was received.
    pub fetched_at: DateTime<Utc>,
    /// End of the freshness lifetime from `max-age` or `Expires`.
    pub expires_at: Option<DateTime<Utc>>,
    /// `Cache-Control: no-cache`.
    #[serde(default)]
    pub no_cache: bool,
    /// `Cache-Control: no-store`.
    #[serde(default)]
    pub no_store: bool,
}

impl HttpValidators {
    /// Builds validators from response header pairs. Names are matched
    /// case-insensitively.
    pub fn from_headers<'a, I>(headers: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut validators = Self {
            etag: None,
            last_modified: None,
            fetched_at: now,
            expires_at: None,
            no_cache: false,
            no_store: false,
        };
        let mut max_age: Option<i64> = None;
        let mut expires: Option<DateTime<Utc>> = None;

        for (name, value) in headers {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "etag" => validators.etag = Some(value.to_string()),
                "last-modified" => validators.last_modified = Some(value.to_string()),
                "expires" => expires = parse_http_date(value),
                "cache-control" => {
                    for directive in value.split(',') {
                        let directive = directive.trim().to_ascii_lowercase();
                        if directive == "no-cache" {
                            validators.no_cache = true;
                        } else if directive == "no-store" {
                            validators.no_store = true;
                        } else if let Some(secs) = directive.strip_prefix("max-age=") {
                            max_age = secs.trim_matches('"').parse().ok();
                        }
                    }
                }
                _ => {}
            }
        }

        // max-age takes precedence over Expires
        validators.expires_at = max_age
            .map(|secs| now + Duration::seconds(secs.max(0)))
            .or(expires);
        validators
    }

    /// Returns true if the response may be served without contacting the origin.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.no_cache && self.expires_at.is_some_and(|expires| now < expires)
    }

    /// Returns true if a conditional request can be built from these validators.
    #[must_use]
    pub const fn can_revalidate(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Combines stored validators with those of a `304 Not Modified` response,
    /// which may omit headers that are still valid.
    #[must_use]
    pub fn refreshed_by(&self, not_modified: Self) -> Self {
        Self {
            etag: not_modified.etag.or_else(|| self.etag.clone()),
            last_modified: not_modified
                .last_modified
                .or_else(|| self.last_modified.clone()),
            fetched_at: not_modified.fetched_at,
            expires_at: not_modified.expires_at,
            no_cache: not_modified.no_cache,
            no_store: not_modified.no_store,
        }
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
