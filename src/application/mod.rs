//! Application layer with the engine facade and DTOs.

/// Data transfer objects.
pub mod dto;
/// Engine facade.
pub mod engine;

pub use dto::EngineStats;
pub use engine::ImageEngine;
