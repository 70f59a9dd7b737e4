//! Placeholder resolvers for platforms with and without bundled assets.

use std::collections::HashMap;

use bytes::Bytes;

use crate::domain::entities::{DefaultSource, ResolvedSource};
use crate::domain::ports::DefaultSourcePort;

/// Resolves asset ids to bytes bundled with the application.
///
/// Cannot resolve uris: a placeholder must be available without network.
#[derive(Debug, Default, Clone)]
pub struct BundledAssetResolver {
    assets: HashMap<u32, Bytes>,
}

impl BundledAssetResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers encoded image bytes under `id`.
    #[must_use]
    pub fn with_asset(mut self, id: u32, bytes: impl Into<Bytes>) -> Self {
        self.assets.insert(id, bytes.into());
        self
    }
}

impl DefaultSourcePort for BundledAssetResolver {
    fn resolve(&self, source: &DefaultSource) -> Option<ResolvedSource> {
        match source {
            DefaultSource::Asset(id) => self.assets.get(id).cloned().map(ResolvedSource::Bytes),
            DefaultSource::Uri(_) => None,
        }
    }
}

/// Maps asset ids to uris and passes uris through unchanged.
#[derive(Debug, Default, Clone)]
pub struct UriAssetResolver {
    assets: HashMap<u32, String>,
}

impl UriAssetResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the uri of asset `id`.
    #[must_use]
    pub fn with_asset(mut self, id: u32, uri: impl Into<String>) -> Self {
        self.assets.insert(id, uri.into());
        self
    }
}

impl DefaultSourcePort for UriAssetResolver {
    fn resolve(&self, source: &DefaultSource) -> Option<ResolvedSource> {
        match source {
            DefaultSource::Asset(id) => self.assets.get(id).cloned().map(ResolvedSource::Uri),
            DefaultSource::Uri(uri) => Some(ResolvedSource::Uri(uri.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_resolver_returns_bytes() {
        let resolver = BundledAssetResolver::new().with_asset(7, vec![1u8, 2, 3]);
        assert_eq!(
            resolver.resolve(&DefaultSource::Asset(7)),
            Some(ResolvedSource::Bytes(Bytes::from_static(&[1, 2, 3])))
        );
        assert_eq!(resolver.resolve(&DefaultSource::Asset(8)), None);
        assert_eq!(resolver.resolve(&DefaultSource::Uri("https://x/p.png".into())), None);
    }

    #[test]
    fn test_uri_resolver_maps_assets() {
        let resolver = UriAssetResolver::new().with_asset(1, "asset:///placeholder.png");
        assert_eq!(
            resolver.resolve(&DefaultSource::Asset(1)),
            Some(ResolvedSource::Uri("asset:///placeholder.png".into()))
        );
        assert_eq!(
            resolver.resolve(&DefaultSource::Uri("https://x/p.png".into())),
            Some(ResolvedSource::Uri("https://x/p.png".into()))
        );
    }
}
