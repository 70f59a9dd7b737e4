//! Domain layer with core entities, errors, and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, ImageRequest, LoadEvent};
pub use errors::{CacheError, EngineError, LoadError};
pub use ports::{DefaultSourcePort, ImageFetcherPort};
