//! Port for platform placeholder resolution.

use crate::domain::entities::{DefaultSource, ResolvedSource};

/// Resolves a placeholder according to what the platform can do.
///
/// Some platforms bundle assets as bytes, others only know asset uris.
#[cfg_attr(test, mockall::automock)]
pub trait DefaultSourcePort: Send + Sync {
    /// Returns `None` when this platform cannot resolve `source`.
    fn resolve(&self, source: &DefaultSource) -> Option<ResolvedSource>;
}
