//! Data transfer objects for the application layer.

mod engine_stats;

pub use engine_stats::EngineStats;
