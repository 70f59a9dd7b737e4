//! Fastimage - image fetch, decode and cache engine.
//!
//! Loads images through a memory store of decoded bitmaps, a persistent disk
//! store of encoded bytes and the network, coalescing concurrent requests for
//! the same source and scheduling fetches by priority.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the engine facade and DTOs.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing stores, fetchers and configuration.
pub mod infrastructure;
/// Presentation layer for the command line.
pub mod presentation;

pub use application::{EngineStats, ImageEngine};
pub use domain::entities::{
    CachePolicy, DefaultSource, ImageRequest, LoadEvent, LoadedImage, Priority, ResizeMode,
    TintColor,
};
pub use domain::errors::{EngineError, LoadError};
pub use domain::ports::LoadListener;
pub use infrastructure::image::LoadSubscription;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "fastimage";
