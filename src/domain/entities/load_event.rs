//! Lifecycle events emitted by a load subscription.

use super::LoadedImage;
use crate::domain::errors::LoadError;

/// One lifecycle event of a load.
///
/// Every subscription sees `LoadStart`, zero or more `Progress`, exactly one of
/// `Load` or `Error`, then `LoadEnd`.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// The load was accepted.
    LoadStart,
    /// Bytes received so far and the expected total, if known.
    Progress {
        /// Bytes received.
        loaded: u64,
        /// Expected total from `Content-Length`.
        total: Option<u64>,
    },
    /// The bitmap is ready.
    Load(LoadedImage),
    /// The load failed.
    Error(LoadError),
    /// No further events follow.
    LoadEnd,
}

impl LoadEvent {
    /// Returns true for `Load` and `Error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Error(_))
    }
}

/// Lifecycle state of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightState {
    /// Waiting for or receiving bytes.
    #[default]
    Fetching,
    /// Bytes available, bitmaps being produced.
    Decoding,
    /// Delivered successfully.
    Done,
    /// Delivered a failure.
    Failed,
}

impl FlightState {
    /// Returns true once subscribers have been notified of the outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}
