//! Placeholder sources resolved per platform.

use bytes::Bytes;

/// A placeholder shown while the real image loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultSource {
    /// A bundled asset referenced by numeric id.
    Asset(u32),
    /// A uri to an image.
    Uri(String),
}

/// What a platform resolver turned a [`DefaultSource`] into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// Encoded image bytes ready for decoding.
    Bytes(Bytes),
    /// A uri to be loaded through the regular pipeline.
    Uri(String),
}
