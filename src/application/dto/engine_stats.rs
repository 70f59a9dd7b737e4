//! Engine statistics snapshot.

use crate::infrastructure::image::{CacheStats, DiskStats};

/// Counters reported by `ImageEngine::stats`.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Memory store counters.
    pub memory: CacheStats,
    /// Disk store counters.
    pub disk: DiskStats,
    /// Flights awaiting their outcome.
    pub in_flight: usize,
    /// Network fetches waiting for a slot.
    pub queued_fetches: usize,
    /// Network fetches in progress.
    pub active_fetches: usize,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.memory)?;
        writeln!(f, "{}", self.disk)?;
        write!(
            f,
            "Loads: {} in flight, {} fetching, {} queued",
            self.in_flight, self.active_fetches, self.queued_fetches
        )
    }
}
