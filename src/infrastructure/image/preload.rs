//! Fire-and-forget warming of the caches.

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::entities::ImageRequest;
use crate::domain::errors::LoadError;

use super::coordinator::FetchCoordinator;

/// Outcome of a preload batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadSummary {
    /// Requests that ended in `Load`.
    pub succeeded: usize,
    /// Failed uris with their error.
    pub failures: Vec<(String, LoadError)>,
}

impl PreloadSummary {
    /// Total requests in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

/// Handle to a running preload batch. Dropping it does not stop the batch.
#[derive(Debug)]
pub struct PreloadHandle {
    task: JoinHandle<PreloadSummary>,
}

impl PreloadHandle {
    /// Waits for every request of the batch to finish.
    pub async fn finished(self) -> PreloadSummary {
        self.task.await.unwrap_or_default()
    }

    /// Returns true once every request has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Populates the caches ahead of display.
#[derive(Debug, Clone)]
pub struct PreloadManager {
    coordinator: FetchCoordinator,
}

impl PreloadManager {
    /// Creates a manager submitting through `coordinator`.
    #[must_use]
    pub const fn new(coordinator: FetchCoordinator) -> Self {
        Self { coordinator }
    }

    /// Submits every request in order and returns immediately.
    ///
    /// Requests already in memory complete at once; the rest follow the normal
    /// load path and leave their bitmaps in the caches. Failures are logged and
    /// never surface to any other consumer.
    pub fn preload(&self, requests: impl IntoIterator<Item = ImageRequest>) -> PreloadHandle {
        let subscriptions: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let uri = request.uri().to_string();
                (uri, self.coordinator.load(request))
            })
            .collect();
        info!(count = subscriptions.len(), "Preloading images");

        let task = tokio::spawn(async move {
            let outcomes = join_all(
                subscriptions
                    .into_iter()
                    .map(|(uri, subscription)| async move { (uri, subscription.outcome().await) }),
            )
            .await;

            let mut summary = PreloadSummary::default();
            for (uri, outcome) in outcomes {
                match outcome {
                    Ok(image) => {
                        debug!(uri = %uri, source = %image.source, "Preloaded");
                        summary.succeeded += 1;
                    }
                    Err(error) => {
                        warn!(uri = %uri, error = %error, "Preload failed");
                        summary.failures.push((uri, error));
                    }
                }
            }
            info!(succeeded = summary.succeeded, failed = summary.failures.len(), "Preload finished");
            summary
        });

        PreloadHandle { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::entities::CachePolicy;
    use crate::domain::ports::mocks::{MockImageFetcher, MockResponse};
    use crate::infrastructure::image::coordinator::CoordinatorConfig;
    use crate::infrastructure::image::decode::tests::png;
    use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache};
    use crate::infrastructure::image::memory_cache::{DEFAULT_MEMORY_BUDGET, MemoryImageCache};
    use tempfile::TempDir;

    async fn manager(fetcher: &Arc<MockImageFetcher>, dir: &TempDir) -> (PreloadManager, FetchCoordinator) {
        let disk = DiskImageCache::new(dir.path().to_path_buf(), DEFAULT_MAX_CACHE_SIZE)
            .await
            .unwrap();
        let coordinator = FetchCoordinator::new(
            Arc::new(MemoryImageCache::new(DEFAULT_MEMORY_BUDGET)),
            Arc::new(disk),
            fetcher.clone(),
            CoordinatorConfig::default(),
        );
        (PreloadManager::new(coordinator.clone()), coordinator)
    }

    #[tokio::test]
    async fn test_preload_warms_memory() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond("https://x/1.png", MockResponse::body(png(10, 10)));
        fetcher.respond("https://x/2.png", MockResponse::body(png(12, 12)));
        let dir = TempDir::new().unwrap();
        let (preloader, coordinator) = manager(&fetcher, &dir).await;

        let requests = vec![
            ImageRequest::new("https://x/1.png"),
            ImageRequest::new("https://x/2.png"),
        ];
        let summary = preloader.preload(requests.clone()).finished().await;
        assert_eq!(summary.succeeded, 2);
        assert!(summary.failures.is_empty());

        for request in requests {
            assert!(coordinator.memory().contains_source(&request.cache_key()));
        }
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_preload_failures_are_collected() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond("https://x/ok.png", MockResponse::body(png(4, 4)));
        let dir = TempDir::new().unwrap();
        let (preloader, _coordinator) = manager(&fetcher, &dir).await;

        let summary = preloader
            .preload([
                ImageRequest::new("https://x/ok.png"),
                ImageRequest::new("https://x/missing.png"),
                ImageRequest::new("https://x/offline.png").with_cache_policy(CachePolicy::CacheOnly),
            ])
            .finished()
            .await;

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded, 1);
        assert!(summary
            .failures
            .iter()
            .any(|(uri, e)| uri == "https://x/offline.png" && *e == LoadError::NotCached));
    }
}
