//! Engine facade consumed by the binding layer and the CLI.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::application::dto::EngineStats;
use crate::domain::entities::{
    Bitmap, CacheKey, DefaultSource, ImageRequest, ResizeMode, ResolvedSource, TargetSize,
    TintColor, Transform,
};
use crate::domain::errors::{CacheResult, EngineError, LoadError};
use crate::domain::ports::{DefaultSourcePort, ImageFetcherPort};
use crate::infrastructure::assets::UriAssetResolver;
use crate::infrastructure::config::{DefaultsConfig, EngineConfig};
use crate::infrastructure::image::{
    DecodePipeline, DiskImageCache, FetchCoordinator, HttpImageFetcher, LoadSubscription,
    MemoryImageCache, PreloadHandle, PreloadManager,
};

/// Entry point: builds requests, loads, preloads and maintains the caches.
#[derive(Clone)]
pub struct ImageEngine {
    coordinator: FetchCoordinator,
    preloader: PreloadManager,
    decoder: DecodePipeline,
    defaults: DefaultsConfig,
    default_sources: Arc<dyn DefaultSourcePort>,
}

impl std::fmt::Debug for ImageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEngine")
            .field("coordinator", &self.coordinator)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ImageEngine {
    /// Creates an engine fetching over HTTP.
    ///
    /// # Errors
    /// Returns error if the disk store cannot be opened or the HTTP client
    /// cannot be built.
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let timeout = Duration::from_secs(config.fetch.request_timeout_secs);
        let fetcher = HttpImageFetcher::new(&config.fetch.user_agent, timeout)?;
        Self::with_fetcher(config, Arc::new(fetcher)).await
    }

    /// Creates an engine with a custom network port.
    ///
    /// # Errors
    /// Returns error if the disk store cannot be opened.
    pub async fn with_fetcher(
        config: EngineConfig,
        fetcher: Arc<dyn ImageFetcherPort>,
    ) -> Result<Self, EngineError> {
        let disk_dir = config.cache.effective_disk_dir();
        let disk = DiskImageCache::new(disk_dir, config.cache.disk_budget_bytes).await?;
        let memory = MemoryImageCache::new(config.cache.memory_budget_bytes);

        let coordinator = FetchCoordinator::new(
            Arc::new(memory),
            Arc::new(disk),
            fetcher,
            config.coordinator_config(),
        );
        info!(
            disk_dir = %coordinator.disk().cache_dir().display(),
            memory_budget = config.cache.memory_budget_bytes,
            disk_budget = config.cache.disk_budget_bytes,
            max_concurrent = config.fetch.max_concurrent_fetches,
            "Image engine ready"
        );

        Ok(Self {
            preloader: PreloadManager::new(coordinator.clone()),
            coordinator,
            decoder: DecodePipeline::new(config.fetch.max_decoded_dimension),
            defaults: config.defaults,
            default_sources: Arc::new(UriAssetResolver::new()),
        })
    }

    /// Replaces the placeholder resolver.
    #[must_use]
    pub fn with_default_sources(mut self, resolver: Arc<dyn DefaultSourcePort>) -> Self {
        self.default_sources = resolver;
        self
    }

    /// Starts a request for `uri` with the configured defaults applied.
    #[must_use]
    pub fn request(&self, uri: impl Into<String>) -> ImageRequest {
        ImageRequest::new(uri)
            .with_cache_policy(self.defaults.cache_policy)
            .with_resize_mode(self.defaults.resize_mode)
            .with_priority(self.defaults.priority)
    }

    /// Starts or joins a load.
    pub fn load(&self, request: ImageRequest) -> LoadSubscription {
        self.coordinator.load(request)
    }

    /// Warms the caches without delivering bitmaps.
    pub fn preload(&self, requests: impl IntoIterator<Item = ImageRequest>) -> PreloadHandle {
        self.preloader.preload(requests)
    }

    /// Renders a placeholder.
    ///
    /// Bundled bytes are decoded directly; uris go through the regular load
    /// pipeline so they are cached like any other image.
    ///
    /// # Errors
    /// Returns `LoadError::NotCached` if the platform resolver cannot resolve
    /// `source`, otherwise the error of the decode or load.
    pub async fn resolve_default(
        &self,
        source: &DefaultSource,
        target: Option<TargetSize>,
        resize: ResizeMode,
        tint: Option<TintColor>,
    ) -> Result<Arc<Bitmap>, LoadError> {
        let resolved = self.default_sources.resolve(source).ok_or_else(|| {
            debug!(?source, "Placeholder not resolvable on this platform");
            LoadError::NotCached
        })?;

        match resolved {
            ResolvedSource::Bytes(bytes) => {
                let transform = Transform {
                    target_size: target,
                    resize_mode: resize,
                    tint,
                };
                self.decoder.decode_async(bytes, transform).await.map(Arc::new)
            }
            ResolvedSource::Uri(uri) => {
                let mut request = self.request(uri).with_resize_mode(resize);
                if let Some(target) = target {
                    request = request.with_target_size(target.width, target.height);
                }
                if let Some(tint) = tint {
                    request = request.with_tint(tint);
                }
                self.load(request).outcome().await.map(|image| image.bitmap)
            }
        }
    }

    /// Snapshot of cache and scheduler counters.
    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            memory: self.coordinator.memory().stats(),
            disk: self.coordinator.disk().stats().await,
            in_flight: self.coordinator.in_flight_count(),
            queued_fetches: self.coordinator.queued_fetches(),
            active_fetches: self.coordinator.active_fetches(),
        }
    }

    /// Drops every decoded bitmap.
    pub fn clear_memory(&self) {
        self.coordinator.memory().clear();
        info!("Cleared memory cache");
    }

    /// Deletes every stored file.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear_disk(&self) -> CacheResult<()> {
        self.coordinator.disk().clear().await?;
        info!("Cleared disk cache");
        Ok(())
    }

    /// Clears both stores.
    ///
    /// # Errors
    /// Returns error if the disk store cannot be cleared.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.clear_memory();
        self.clear_disk().await
    }

    /// Returns true while a load of `key` is in flight.
    #[must_use]
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.coordinator.is_loading(key)
    }

    /// The underlying coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }
}
