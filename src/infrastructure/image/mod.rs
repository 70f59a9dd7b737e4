//! Image loading infrastructure.
//!
//! This module provides:
//! - Memory caching of decoded renditions with byte-budget LRU eviction
//! - Disk caching of encoded bytes that survives restarts
//! - Decoding, resizing and tinting off the async runtime
//! - Priority scheduling and coalescing of network fetches

pub mod coordinator;
pub mod decode;
pub mod disk_cache;
pub mod http_fetcher;
pub mod memory_cache;
pub mod preload;
pub mod scheduler;
pub mod subscription;

pub use coordinator::{CoordinatorConfig, FetchCoordinator};
pub use decode::DecodePipeline;
pub use disk_cache::{DiskImageCache, DiskStats};
pub use http_fetcher::HttpImageFetcher;
pub use memory_cache::{CacheStats, MemoryImageCache, MemoryKey};
pub use preload::{PreloadHandle, PreloadManager, PreloadSummary};
pub use scheduler::FetchScheduler;
pub use subscription::{LoadSubscription, SubscriptionId};
