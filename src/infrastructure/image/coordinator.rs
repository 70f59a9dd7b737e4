//! Request coalescing and the memory -> disk -> network load pipeline.
//!
//! Every load is keyed by its [`CacheKey`]. Concurrent loads of one key share a
//! single flight: one disk read, at most one network fetch, and one decode per
//! distinct rendition. The flight is aborted when its last subscriber leaves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::domain::entities::{
    Bitmap, CacheEntry, CacheKey, CachePolicy, FlightState, HttpValidators, ImageRequest,
    ImageSource, LoadEvent, LoadedImage, RevalidationMode, Transform,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{FetchOutcome, FetchRequest, ImageFetcherPort};

use super::decode::{DEFAULT_MAX_DIMENSION, DecodePipeline};
use super::disk_cache::DiskImageCache;
use super::memory_cache::{MemoryImageCache, MemoryKey};
use super::scheduler::{DEFAULT_MAX_CONCURRENT_FETCHES, FetchScheduler};
use super::subscription::{LoadSubscription, SubscriptionId};

/// Configuration for the fetch coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum concurrent network fetches.
    pub max_concurrent_fetches: usize,
    /// Deadline applied to requests that carry none.
    pub default_deadline: Option<Duration>,
    /// How `Web` entries on disk are revalidated.
    pub revalidation: RevalidationMode,
    /// Largest accepted source width or height.
    pub max_decoded_dimension: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            default_deadline: None,
            revalidation: RevalidationMode::default(),
            max_decoded_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

struct Subscriber {
    events: mpsc::UnboundedSender<LoadEvent>,
    transform: Transform,
}

impl Subscriber {
    fn finish(&self, outcome: LoadEvent) {
        let _ = self.events.send(outcome);
        let _ = self.events.send(LoadEvent::LoadEnd);
    }
}

struct InFlight {
    flight_id: u64,
    state: FlightState,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    task: Option<AbortHandle>,
}

enum RenderStep {
    Render(Vec<Transform>),
    Deliver(InFlight),
    Gone,
}

/// Identifies a flight. Requests of one source coalesce only when their cache
/// policies match, since the policy decides whether the network may be used
/// and whether a disk copy needs revalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FlightKey {
    pub(crate) key: CacheKey,
    pub(crate) policy: CachePolicy,
}

impl std::fmt::Display for FlightKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.key, self.policy)
    }
}

/// Table of in-flight requests, shared with subscriptions so they can leave.
pub(crate) struct FlightRegistry {
    flights: Mutex<HashMap<FlightKey, InFlight>>,
}

impl FlightRegistry {
    fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Removes a subscriber; aborts the flight if it was the last one.
    pub(crate) fn unsubscribe(&self, flight_key: &FlightKey, id: SubscriptionId) {
        let mut flights = self.flights.lock();
        let Some(flight) = flights.get_mut(flight_key) else {
            return;
        };
        if flight.subscribers.remove(&id).is_none() {
            return;
        }
        trace!(flight = %flight_key, subscription = %id, remaining = flight.subscribers.len(), "Subscriber left");

        if flight.subscribers.is_empty()
            && let Some(flight) = flights.remove(flight_key)
        {
            if let Some(task) = flight.task {
                task.abort();
            }
            debug!(flight = %flight_key, "Aborted load with no subscribers");
        }
    }

    fn broadcast(&self, flight_key: &FlightKey, flight_id: u64, event: &LoadEvent) {
        let flights = self.flights.lock();
        if let Some(flight) = flights.get(flight_key).filter(|f| f.flight_id == flight_id) {
            for subscriber in flight.subscribers.values() {
                let _ = subscriber.events.send(event.clone());
            }
        }
    }

    fn set_state(&self, flight_key: &FlightKey, flight_id: u64, state: FlightState) {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get_mut(flight_key).filter(|f| f.flight_id == flight_id) {
            flight.state = state;
        }
    }

    fn take(&self, flight_key: &FlightKey, flight_id: u64) -> Option<InFlight> {
        let mut flights = self.flights.lock();
        if flights.get(flight_key).is_some_and(|f| f.flight_id == flight_id) {
            flights.remove(flight_key)
        } else {
            None
        }
    }

    // Renditions still missing, or the flight itself once every subscriber is
    // covered. Both are decided under one lock so no late joiner is skipped.
    fn next_render_step(
        &self,
        flight_key: &FlightKey,
        flight_id: u64,
        rendered: &HashMap<Transform, Arc<Bitmap>>,
    ) -> RenderStep {
        let mut flights = self.flights.lock();
        let Some(flight) = flights.get(flight_key).filter(|f| f.flight_id == flight_id) else {
            return RenderStep::Gone;
        };

        let pending: HashSet<Transform> = flight
            .subscribers
            .values()
            .map(|s| s.transform)
            .filter(|t| !rendered.contains_key(t))
            .collect();

        if pending.is_empty() {
            flights.remove(flight_key).map_or(RenderStep::Gone, RenderStep::Deliver)
        } else {
            RenderStep::Render(pending.into_iter().collect())
        }
    }
}

struct Shared {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    decoder: DecodePipeline,
    scheduler: FetchScheduler,
    registry: Arc<FlightRegistry>,
    config: CoordinatorConfig,
    submissions: AtomicU64,
    flight_ids: AtomicU64,
}

/// Coalesces loads per cache key and drives them through the cache tiers.
#[derive(Clone)]
pub struct FetchCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("config", &self.shared.config)
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator over the given stores. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryImageCache>,
        disk: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
        config: CoordinatorConfig,
    ) -> Self {
        let shared = Shared {
            memory,
            disk,
            fetcher,
            decoder: DecodePipeline::new(config.max_decoded_dimension),
            scheduler: FetchScheduler::new(config.max_concurrent_fetches),
            registry: Arc::new(FlightRegistry::new()),
            config,
            submissions: AtomicU64::new(0),
            flight_ids: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Starts or joins a load.
    ///
    /// A memory hit is answered before this returns: the subscription already
    /// holds `LoadStart`, `Load` and `LoadEnd`.
    pub fn load(&self, request: ImageRequest) -> LoadSubscription {
        let shared = &self.shared;
        let flight_key = FlightKey {
            key: request.cache_key(),
            policy: request.cache_policy(),
        };
        let key = &flight_key.key;
        let transform = request.transform();
        let id = SubscriptionId::new();
        let (events, receiver) = mpsc::unbounded_channel();
        let _ = events.send(LoadEvent::LoadStart);

        if let Err(error) = shared.decoder.check_target(&transform) {
            warn!(key = %key, error = %error, "Rejected load");
            let _ = events.send(LoadEvent::Error(error));
            let _ = events.send(LoadEvent::LoadEnd);
            return LoadSubscription::completed(id, flight_key, receiver);
        }

        // flights populate memory before leaving the table, so checking memory
        // under this lock never misses a just-finished flight
        let mut flights = shared.registry.flights.lock();

        if let Some(bitmap) = shared.memory.get(&MemoryKey::new(key.clone(), transform)) {
            drop(flights);
            trace!(key = %key, "Memory cache hit");
            let _ = events.send(LoadEvent::Load(LoadedImage {
                key: key.clone(),
                bitmap,
                source: ImageSource::MemoryCache,
            }));
            let _ = events.send(LoadEvent::LoadEnd);
            return LoadSubscription::completed(id, flight_key, receiver);
        }

        if let Some(flight) = flights.get_mut(&flight_key) {
            flight.subscribers.insert(id, Subscriber { events, transform });
            debug!(flight = %flight_key, subscribers = flight.subscribers.len(), "Joined in-flight load");
            return LoadSubscription::attached(id, flight_key, receiver, shared.registry.clone());
        }

        let flight_id = shared.flight_ids.fetch_add(1, Ordering::Relaxed);
        let seq = shared.submissions.fetch_add(1, Ordering::Relaxed);
        let mut flight = InFlight {
            flight_id,
            state: FlightState::Fetching,
            subscribers: HashMap::new(),
            task: None,
        };
        flight.subscribers.insert(id, Subscriber { events, transform });

        debug!(flight = %flight_key, uri = %request.uri(), priority = %request.priority(), "Starting load");
        let task = tokio::spawn(
            shared
                .clone()
                .drive(flight_key.clone(), flight_id, request, seq),
        );
        flight.task = Some(task.abort_handle());
        flights.insert(flight_key.clone(), flight);
        drop(flights);

        LoadSubscription::attached(id, flight_key, receiver, shared.registry.clone())
    }

    /// Returns true while a flight for `key` is pending under any policy.
    #[must_use]
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.shared
            .registry
            .flights
            .lock()
            .keys()
            .any(|flight| flight.key == *key)
    }

    /// Lifecycle state of a flight for `key`, if any.
    #[must_use]
    pub fn flight_state(&self, key: &CacheKey) -> Option<FlightState> {
        self.shared
            .registry
            .flights
            .lock()
            .iter()
            .find(|(flight, _)| flight.key == *key)
            .map(|(_, f)| f.state)
    }

    /// Number of pending flights.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.registry.flights.lock().len()
    }

    /// Number of network fetches waiting for a concurrency slot.
    #[must_use]
    pub fn queued_fetches(&self) -> usize {
        self.shared.scheduler.queued_len()
    }

    /// Number of network fetches in progress.
    #[must_use]
    pub fn active_fetches(&self) -> usize {
        self.shared.scheduler.active_len()
    }

    /// The memory store.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryImageCache> {
        &self.shared.memory
    }

    /// The disk store.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskImageCache> {
        &self.shared.disk
    }
}

impl Shared {
    async fn drive(
        self: Arc<Self>,
        flight: FlightKey,
        flight_id: u64,
        request: ImageRequest,
        seq: u64,
    ) {
        let key = &flight.key;
        let deadline = request.deadline().or(self.config.default_deadline);

        let work = async {
            match self.retrieve(&flight, flight_id, &request, seq).await {
                Ok((bytes, source)) => self.render(&flight, flight_id, bytes, source).await,
                Err(error) => self.fail(&flight, flight_id, error),
            }
        };

        match deadline {
            Some(limit) => {
                if tokio::time::timeout(limit, work).await.is_err() {
                    warn!(key = %key, deadline_ms = limit.as_millis(), "Load timed out");
                    self.fail(&flight, flight_id, LoadError::Timeout);
                }
            }
            None => work.await,
        }
    }

    async fn retrieve(
        &self,
        flight: &FlightKey,
        flight_id: u64,
        request: &ImageRequest,
        seq: u64,
    ) -> Result<(Bytes, ImageSource), LoadError> {
        let key = &flight.key;
        let policy = request.cache_policy();

        if let Some(entry) = self.disk.get(key).await {
            if self.serve_from_disk(policy, entry.validators.as_ref()) {
                debug!(key = %key, size = entry.size_bytes, "Serving from disk cache");
                return Ok((entry.payload, ImageSource::DiskCache));
            }
            return self.revalidate(flight, flight_id, request, seq, entry).await;
        }

        if !policy.allows_network() {
            debug!(key = %key, "Not on disk and network disallowed");
            return Err(LoadError::NotCached);
        }

        match self.download(flight, flight_id, request, seq, None).await? {
            FetchOutcome::Fetched { bytes, validators } => {
                self.persist(key, request, &bytes, validators).await;
                Ok((bytes, ImageSource::Network))
            }
            FetchOutcome::NotModified { .. } => Err(LoadError::network(
                "Received 304 for an unconditional request",
            )),
        }
    }

    fn serve_from_disk(&self, policy: CachePolicy, validators: Option<&HttpValidators>) -> bool {
        match policy {
            CachePolicy::Immutable | CachePolicy::CacheOnly => true,
            CachePolicy::Web => match self.config.revalidation {
                RevalidationMode::Never => true,
                RevalidationMode::Always => false,
                RevalidationMode::Standard => validators.is_some_and(|v| v.is_fresh(Utc::now())),
            },
        }
    }

    async fn revalidate(
        &self,
        flight: &FlightKey,
        flight_id: u64,
        request: &ImageRequest,
        seq: u64,
        cached: CacheEntry<Bytes>,
    ) -> Result<(Bytes, ImageSource), LoadError> {
        let key = &flight.key;
        let conditional = cached
            .validators
            .clone()
            .filter(HttpValidators::can_revalidate);
        debug!(key = %key, conditional = conditional.is_some(), "Revalidating disk entry");

        match self.download(flight, flight_id, request, seq, conditional).await? {
            FetchOutcome::NotModified { validators } => {
                let refreshed = match cached.validators {
                    Some(stored) => stored.refreshed_by(validators),
                    None => validators,
                };
                if let Err(e) = self.disk.update_validators(key, refreshed).await {
                    warn!(key = %key, error = %e, "Failed to store refreshed validators");
                }
                debug!(key = %key, "Disk entry still valid");
                Ok((cached.payload, ImageSource::DiskCache))
            }
            FetchOutcome::Fetched { bytes, validators } => {
                self.persist(key, request, &bytes, validators).await;
                Ok((bytes, ImageSource::Network))
            }
        }
    }

    async fn download(
        &self,
        flight: &FlightKey,
        flight_id: u64,
        request: &ImageRequest,
        seq: u64,
        conditional: Option<HttpValidators>,
    ) -> Result<FetchOutcome, LoadError> {
        let key = &flight.key;
        let _permit = self
            .scheduler
            .acquire(key.clone(), request.priority(), seq)
            .await
            .ok_or_else(|| LoadError::network("Fetch scheduler stopped"))?;

        let fetch = FetchRequest {
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
            conditional,
        };
        let registry = self.registry.clone();
        let progress_flight = flight.clone();
        let progress = move |loaded: u64, total: Option<u64>| {
            registry.broadcast(&progress_flight, flight_id, &LoadEvent::Progress { loaded, total });
        };

        debug!(key = %key, uri = %fetch.uri, "Fetching image");
        self.fetcher.fetch(&fetch, &progress).await
    }

    async fn persist(
        &self,
        key: &CacheKey,
        request: &ImageRequest,
        bytes: &Bytes,
        validators: HttpValidators,
    ) {
        let validators = match request.cache_policy() {
            CachePolicy::Web if validators.no_store => {
                debug!(key = %key, "Response is no-store, not persisted");
                self.disk.remove(key).await;
                return;
            }
            CachePolicy::Web => Some(validators),
            CachePolicy::Immutable | CachePolicy::CacheOnly => None,
        };

        if let Err(e) = self.disk.put(key, request.uri(), bytes, validators).await {
            warn!(key = %key, error = %e, "Failed to write disk cache");
        }
    }

    async fn render(&self, flight: &FlightKey, flight_id: u64, bytes: Bytes, source: ImageSource) {
        let key = &flight.key;
        self.registry.set_state(flight, flight_id, FlightState::Decoding);
        let mut rendered: HashMap<Transform, Arc<Bitmap>> = HashMap::new();

        loop {
            let pending = match self.registry.next_render_step(flight, flight_id, &rendered) {
                RenderStep::Render(pending) => pending,
                RenderStep::Deliver(done) => {
                    self.deliver(key, done, &rendered, source);
                    return;
                }
                RenderStep::Gone => {
                    trace!(key = %key, "Flight gone before delivery");
                    return;
                }
            };

            for transform in pending {
                match self.decoder.decode_async(bytes.clone(), transform).await {
                    Ok(bitmap) => {
                        let bitmap = Arc::new(bitmap);
                        self.memory
                            .put(MemoryKey::new(key.clone(), transform), bitmap.clone());
                        rendered.insert(transform, bitmap);
                    }
                    Err(error) => {
                        warn!(key = %key, error = %error, "Decode failed, purging cached copies");
                        self.disk.remove(key).await;
                        self.memory.remove_source(key);
                        self.fail(flight, flight_id, error);
                        return;
                    }
                }
            }
        }
    }

    fn deliver(
        &self,
        key: &CacheKey,
        mut flight: InFlight,
        rendered: &HashMap<Transform, Arc<Bitmap>>,
        source: ImageSource,
    ) {
        flight.state = FlightState::Done;
        debug!(key = %key, source = %source, subscribers = flight.subscribers.len(), "Load complete");

        for subscriber in flight.subscribers.values() {
            let outcome = match rendered.get(&subscriber.transform) {
                Some(bitmap) => LoadEvent::Load(LoadedImage {
                    key: key.clone(),
                    bitmap: bitmap.clone(),
                    source,
                }),
                None => LoadEvent::Error(LoadError::decode("Rendition unavailable")),
            };
            subscriber.finish(outcome);
        }
    }

    fn fail(&self, flight_key: &FlightKey, flight_id: u64, error: LoadError) {
        let Some(mut flight) = self.registry.take(flight_key, flight_id) else {
            return;
        };
        flight.state = FlightState::Failed;
        warn!(flight = %flight_key, reason = error.reason(), error = %error, subscribers = flight.subscribers.len(), "Load failed");

        for subscriber in flight.subscribers.values() {
            subscriber.finish(LoadEvent::Error(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Priority, ResizeMode};
    use crate::domain::ports::mocks::{MockImageFetcher, MockResponse};
    use crate::infrastructure::image::decode::tests::png;
    use crate::infrastructure::image::disk_cache::DEFAULT_MAX_CACHE_SIZE;
    use crate::infrastructure::image::memory_cache::DEFAULT_MEMORY_BUDGET;
    use tempfile::TempDir;

    const URI: &str = "https://x/a.png";

    async fn setup(fetcher: &Arc<MockImageFetcher>, max_concurrent: usize) -> (FetchCoordinator, TempDir) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryImageCache::new(DEFAULT_MEMORY_BUDGET));
        let disk = Arc::new(
            DiskImageCache::new(dir.path().to_path_buf(), DEFAULT_MAX_CACHE_SIZE)
                .await
                .unwrap(),
        );
        let config = CoordinatorConfig {
            max_concurrent_fetches: max_concurrent,
            ..CoordinatorConfig::default()
        };
        let coordinator = FetchCoordinator::new(memory, disk, fetcher.clone(), config);
        (coordinator, dir)
    }

    async fn collect(mut subscription: LoadSubscription) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscription.next_event().await {
            events.push(event);
        }
        events
    }

    fn loaded(events: &[LoadEvent]) -> LoadedImage {
        events
            .iter()
            .find_map(|e| match e {
                LoadEvent::Load(image) => Some(image.clone()),
                _ => None,
            })
            .expect("no Load event")
    }

    #[tokio::test]
    async fn test_network_load_then_memory_hit() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond(URI, MockResponse::body(png(400, 300)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI)
            .with_target_size(100, 100)
            .with_resize_mode(ResizeMode::Cover);

        let first = collect(coordinator.load(request.clone())).await;
        assert!(matches!(first.first(), Some(LoadEvent::LoadStart)));
        assert!(first.iter().any(|e| matches!(e, LoadEvent::Progress { .. })));
        assert!(matches!(first.last(), Some(LoadEvent::LoadEnd)));
        let image = loaded(&first);
        assert_eq!((image.bitmap.width(), image.bitmap.height()), (100, 100));
        assert_eq!(image.source, ImageSource::Network);

        let mut second = coordinator.load(request);
        assert!(matches!(second.try_next_event(), Some(LoadEvent::LoadStart)));
        match second.try_next_event() {
            Some(LoadEvent::Load(hit)) => {
                assert_eq!(hit.source, ImageSource::MemoryCache);
                assert!(Arc::ptr_eq(&hit.bitmap, &image.bitmap));
            }
            other => panic!("expected synchronous Load, got {other:?}"),
        }
        assert!(matches!(second.try_next_event(), Some(LoadEvent::LoadEnd)));
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(64, 64)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let a = coordinator.load(ImageRequest::new(URI));
        let b = coordinator.load(ImageRequest::new(URI));
        fetcher.wait_for_calls(1).await;
        assert_eq!(coordinator.in_flight_count(), 1);
        assert_eq!(coordinator.flight_state(a.key()), Some(FlightState::Fetching));
        fetcher.release(1);

        let (a, b) = tokio::join!(a.outcome(), b.outcome());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a.bitmap, &b.bitmap));
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_coalesced_loads_get_their_own_rendition() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(80, 80)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let small = coordinator.load(ImageRequest::new(URI).with_target_size(20, 20));
        let large = coordinator.load(ImageRequest::new(URI).with_target_size(50, 50));
        fetcher.wait_for_calls(1).await;
        fetcher.release(1);

        let (small, large) = tokio::join!(small.outcome(), large.outcome());
        assert_eq!(small.unwrap().bitmap.width(), 20);
        assert_eq!(large.unwrap().bitmap.width(), 50);
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(coordinator.memory().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_retry_starts_clean() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::Status(500));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let a = coordinator.load(ImageRequest::new(URI));
        let b = coordinator.load(ImageRequest::new(URI));
        fetcher.wait_for_calls(1).await;
        fetcher.release(1);
        let (a, b) = tokio::join!(a.outcome(), b.outcome());
        assert!(matches!(a, Err(LoadError::NetworkError { .. })));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert!(!coordinator.is_loading(&ImageRequest::new(URI).cache_key()));

        fetcher.respond(URI, MockResponse::body(png(16, 16)));
        fetcher.release(1);
        let retry = coordinator.load(ImageRequest::new(URI)).outcome().await;
        assert!(retry.is_ok());
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_only_miss_never_touches_network() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let request = ImageRequest::new(URI).with_cache_policy(CachePolicy::CacheOnly);
        let events = collect(coordinator.load(request)).await;
        assert!(matches!(events[1], LoadEvent::Error(LoadError::NotCached)));
        assert!(matches!(events.last(), Some(LoadEvent::LoadEnd)));
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disk_hit_skips_network() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI).with_cache_policy(CachePolicy::CacheOnly);
        coordinator
            .disk()
            .put(&request.cache_key(), URI, &png(32, 32), None)
            .await
            .unwrap();

        let image = coordinator.load(request.clone()).outcome().await.unwrap();
        assert_eq!(image.source, ImageSource::DiskCache);
        assert_eq!(fetcher.call_count(), 0);
        assert!(coordinator.memory().contains_source(&request.cache_key()));
    }

    #[tokio::test]
    async fn test_truncated_image_is_not_cached() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let mut bytes = png(64, 64);
        bytes.truncate(bytes.len() - 20);
        fetcher.respond("https://x/bad.png", MockResponse::body(bytes));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let request = ImageRequest::new("https://x/bad.png");
        let outcome = coordinator.load(request.clone()).outcome().await;
        assert!(matches!(outcome, Err(LoadError::DecodeError { .. })));

        let key = request.cache_key();
        assert!(!coordinator.memory().contains_source(&key));
        assert!(!coordinator.disk().contains(&key).await);
    }

    #[tokio::test]
    async fn test_high_priority_fetched_before_queued_normal() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        for name in ["blocker", "n1", "n2", "h"] {
            fetcher.respond(&format!("https://x/{name}.png"), MockResponse::body(png(8, 8)));
        }
        let (coordinator, _dir) = setup(&fetcher, 1).await;

        let blocker = coordinator.load(
            ImageRequest::new("https://x/blocker.png").with_priority(Priority::Low),
        );
        fetcher.wait_for_calls(1).await;

        let n1 = coordinator.load(ImageRequest::new("https://x/n1.png"));
        let n2 = coordinator.load(ImageRequest::new("https://x/n2.png"));
        let h = coordinator.load(ImageRequest::new("https://x/h.png").with_priority(Priority::High));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.queued_fetches(), 3);

        fetcher.release(4);
        let results = futures_util::future::join_all([
            blocker.outcome(),
            n1.outcome(),
            n2.outcome(),
            h.outcome(),
        ])
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(
            fetcher.started_order(),
            vec![
                "https://x/blocker.png",
                "https://x/h.png",
                "https://x/n1.png",
                "https://x/n2.png",
            ]
        );
    }

    #[tokio::test]
    async fn test_deadline_expiry_times_out() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(8, 8)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let request = ImageRequest::new(URI).with_deadline(Duration::from_millis(50));
        let outcome = coordinator.load(request).outcome().await;
        assert_eq!(outcome.unwrap_err(), LoadError::Timeout);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_does_not_affect_others() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(8, 8)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let leaving = coordinator.load(ImageRequest::new(URI));
        let staying = coordinator.load(ImageRequest::new(URI));
        fetcher.wait_for_calls(1).await;

        let key = leaving.key().clone();
        leaving.cancel();
        assert!(coordinator.is_loading(&key));

        fetcher.release(1);
        assert!(staying.outcome().await.is_ok());
    }

    #[tokio::test]
    async fn test_last_subscriber_leaving_aborts_flight() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(8, 8)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let subscription = coordinator.load(ImageRequest::new(URI));
        let key = subscription.key().clone();
        fetcher.wait_for_calls(1).await;
        drop(subscription);
        assert!(!coordinator.is_loading(&key));

        let again = coordinator.load(ImageRequest::new(URI));
        fetcher.wait_for_calls(2).await;
        fetcher.release(1);
        assert!(again.outcome().await.is_ok());
    }

    #[tokio::test]
    async fn test_web_entry_revalidated_with_not_modified() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond(
            URI,
            MockResponse::Body {
                bytes: png(16, 16).into(),
                headers: vec![("ETag".to_string(), "\"v1\"".to_string())],
            },
        );
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI).with_cache_policy(CachePolicy::Web);

        let first = coordinator.load(request.clone()).outcome().await.unwrap();
        assert_eq!(first.source, ImageSource::Network);

        coordinator.memory().clear();
        fetcher.respond(URI, MockResponse::NotModified { headers: Vec::new() });
        let second = coordinator.load(request).outcome().await.unwrap();
        assert_eq!(second.source, ImageSource::DiskCache);

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        let conditional = requests[1].conditional.as_ref().unwrap();
        assert_eq!(conditional.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_fresh_web_entry_served_without_network() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond(
            URI,
            MockResponse::Body {
                bytes: png(16, 16).into(),
                headers: vec![("Cache-Control".to_string(), "max-age=3600".to_string())],
            },
        );
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI).with_cache_policy(CachePolicy::Web);

        coordinator.load(request.clone()).outcome().await.unwrap();
        coordinator.memory().clear();
        let second = coordinator.load(request).outcome().await.unwrap();
        assert_eq!(second.source, ImageSource::DiskCache);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_store_response_not_persisted() {
        let fetcher = Arc::new(MockImageFetcher::new());
        fetcher.respond(
            URI,
            MockResponse::Body {
                bytes: png(16, 16).into(),
                headers: vec![("Cache-Control".to_string(), "no-store".to_string())],
            },
        );
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI).with_cache_policy(CachePolicy::Web);

        assert!(coordinator.load(request.clone()).outcome().await.is_ok());
        assert!(!coordinator.disk().contains(&request.cache_key()).await);
    }

    #[tokio::test]
    async fn test_cache_only_flight_does_not_capture_network_load() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(24, 24)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let cache_only =
            coordinator.load(ImageRequest::new(URI).with_cache_policy(CachePolicy::CacheOnly));
        let immutable =
            coordinator.load(ImageRequest::new(URI).with_cache_policy(CachePolicy::Immutable));
        assert_eq!(cache_only.key(), immutable.key());
        assert_eq!(coordinator.in_flight_count(), 2);

        assert_eq!(cache_only.outcome().await.unwrap_err(), LoadError::NotCached);
        fetcher.wait_for_calls(1).await;
        fetcher.release(1);

        let image = immutable.outcome().await.unwrap();
        assert_eq!(image.source, ImageSource::Network);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_web_load_revalidates_while_immutable_reads_disk() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(16, 16)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let immutable = ImageRequest::new(URI);
        coordinator
            .disk()
            .put(&immutable.cache_key(), URI, &png(32, 32), None)
            .await
            .unwrap();

        let from_disk = coordinator.load(immutable);
        let web = coordinator.load(ImageRequest::new(URI).with_cache_policy(CachePolicy::Web));

        let image = from_disk.outcome().await.unwrap();
        assert_eq!(image.source, ImageSource::DiskCache);
        assert_eq!(image.bitmap.width(), 32);

        fetcher.wait_for_calls(1).await;
        fetcher.release(1);
        let image = web.outcome().await.unwrap();
        assert_eq!(image.source, ImageSource::Network);
        assert_eq!(image.bitmap.width(), 16);
        assert_eq!(fetcher.call_count(), 1);
        assert!(fetcher.requests()[0].conditional.is_none());
    }

    #[tokio::test]
    async fn test_oversized_target_rejected_without_touching_caches() {
        let fetcher = Arc::new(MockImageFetcher::new());
        let (coordinator, _dir) = setup(&fetcher, 4).await;
        let request = ImageRequest::new(URI);
        coordinator
            .disk()
            .put(&request.cache_key(), URI, &png(8, 8), None)
            .await
            .unwrap();

        let oversized = request.clone().with_target_size(DEFAULT_MAX_DIMENSION + 1, 10);
        let outcome = coordinator.load(oversized).outcome().await;
        assert!(matches!(outcome, Err(LoadError::DecodeError { .. })));
        assert_eq!(coordinator.in_flight_count(), 0);
        assert!(coordinator.disk().contains(&request.cache_key()).await);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_reaches_every_subscriber() {
        let fetcher = Arc::new(MockImageFetcher::gated());
        fetcher.respond(URI, MockResponse::body(png(48, 48)));
        let (coordinator, _dir) = setup(&fetcher, 4).await;

        let a = coordinator.load(ImageRequest::new(URI));
        let b = coordinator.load(ImageRequest::new(URI).with_target_size(10, 10));
        fetcher.wait_for_calls(1).await;
        fetcher.release(1);

        let (a, b) = tokio::join!(collect(a), collect(b));
        for events in [&a, &b] {
            let last = events.iter().rev().find_map(|e| match e {
                LoadEvent::Progress { loaded, total } => Some((*loaded, *total)),
                _ => None,
            });
            let (loaded, total) = last.unwrap();
            assert_eq!(Some(loaded), total);
        }
    }
}
