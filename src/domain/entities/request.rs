//! Image request definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CacheKey;

/// Cache-control policy for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Ignore headers, use the uri as cache key, fetch only if not cached.
    #[default]
    #[serde(rename = "immutable")]
    Immutable,
    /// Respect HTTP cache headers.
    #[serde(rename = "web")]
    Web,
    /// Only load from cache, never touch the network.
    #[serde(rename = "cacheOnly")]
    CacheOnly,
}

impl CachePolicy {
    /// Returns true if this policy may issue network requests.
    #[must_use]
    pub const fn allows_network(self) -> bool {
        !matches!(self, Self::CacheOnly)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immutable => write!(f, "immutable"),
            Self::Web => write!(f, "web"),
            Self::CacheOnly => write!(f, "cacheOnly"),
        }
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immutable" => Ok(Self::Immutable),
            "web" => Ok(Self::Web),
            "cacheOnly" | "cache-only" | "cacheonly" => Ok(Self::CacheOnly),
            other => Err(format!("unknown cache policy: {other}")),
        }
    }
}

/// How a decoded image is fitted into the target box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Fit within the box preserving aspect, letterboxed.
    Contain,
    /// Fill the box preserving aspect, cropped.
    #[default]
    Cover,
    /// Fill the box ignoring aspect.
    Stretch,
    /// Native size, centered and clipped to the box.
    Center,
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contain => write!(f, "contain"),
            Self::Cover => write!(f, "cover"),
            Self::Stretch => write!(f, "stretch"),
            Self::Center => write!(f, "center"),
        }
    }
}

impl FromStr for ResizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contain" => Ok(Self::Contain),
            "cover" => Ok(Self::Cover),
            "stretch" => Ok(Self::Stretch),
            "center" => Ok(Self::Center),
            other => Err(format!("unknown resize mode: {other}")),
        }
    }
}

/// Scheduling priority of a network fetch.
///
/// Ordering matters: `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lower than usual.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Higher than usual.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Target box dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    /// Box width.
    pub width: u32,
    /// Box height.
    pub height: u32,
}

impl TargetSize {
    /// Creates a target size. Zero dimensions are clamped to one pixel.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

/// Uniform tint applied to every non-transparent pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TintColor {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl TintColor {
    /// Creates a tint from RGB components.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for TintColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for TintColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix('#').unwrap_or(s);
        if hex_part.len() != 6 {
            return Err(format!("tint must be #rrggbb, got {s}"));
        }
        let bytes = hex::decode(hex_part).map_err(|e| format!("invalid tint {s}: {e}"))?;
        Ok(Self::rgb(bytes[0], bytes[1], bytes[2]))
    }
}

/// The rendition a consumer wants: box, fit and tint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Transform {
    /// Target box, or native size when absent.
    pub target_size: Option<TargetSize>,
    /// Fit mode inside the box.
    pub resize_mode: ResizeMode,
    /// Optional recolor.
    pub tint: Option<TintColor>,
}

/// A request to load one image. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    uri: String,
    headers: BTreeMap<String, String>,
    cache_policy: CachePolicy,
    transform: Transform,
    priority: Priority,
    deadline: Option<Duration>,
}

impl ImageRequest {
    /// Creates a request for `uri` with default options.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: BTreeMap::new(),
            cache_policy: CachePolicy::default(),
            transform: Transform::default(),
            priority: Priority::default(),
            deadline: None,
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the cache-control policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the target box.
    #[must_use]
    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.transform.target_size = Some(TargetSize::new(width, height));
        self
    }

    /// Sets the resize mode.
    #[must_use]
    pub const fn with_resize_mode(mut self, mode: ResizeMode) -> Self {
        self.transform.resize_mode = mode;
        self
    }

    /// Sets the tint color.
    #[must_use]
    pub const fn with_tint(mut self, tint: TintColor) -> Self {
        self.transform.tint = Some(tint);
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the engine's default deadline for this request.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the source uri.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the cache policy.
    #[must_use]
    pub const fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Returns the requested rendition.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        self.transform
    }

    /// Returns the target box, if any.
    #[must_use]
    pub const fn target_size(&self) -> Option<TargetSize> {
        self.transform.target_size
    }

    /// Returns the resize mode.
    #[must_use]
    pub const fn resize_mode(&self) -> ResizeMode {
        self.transform.resize_mode
    }

    /// Returns the tint, if any.
    #[must_use]
    pub const fn tint(&self) -> Option<TintColor> {
        self.transform.tint
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the per-request deadline override.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Derives the cache key for this request.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.uri, self.cache_policy)
    }
}
