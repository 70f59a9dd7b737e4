//! Infrastructure layer with external service adapters.

/// Placeholder resolvers.
pub mod assets;
/// Application configuration.
pub mod config;
/// Image fetching, decoding and caching.
pub mod image;

pub use assets::{BundledAssetResolver, UriAssetResolver};
pub use config::{AppConfig, CliArgs, ConfigError, ConfigStore, EngineConfig, LogLevel};
pub use image::{
    CacheStats, CoordinatorConfig, DiskImageCache, DiskStats, FetchCoordinator, HttpImageFetcher,
    LoadSubscription, MemoryImageCache, PreloadHandle, PreloadManager, PreloadSummary,
};
