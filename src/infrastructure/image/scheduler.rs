//! Priority-ordered admission of network fetches.
//!
//! Fetches queue here and receive a concurrency permit in priority order
//! (`High` before `Normal` before `Low`), FIFO within one priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, Priority};

/// Default number of concurrent network fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

struct QueuedFetch {
    key: CacheKey,
    priority: Priority,
    seq: u64,
    grant: oneshot::Sender<OwnedSemaphorePermit>,
    slot: QueueSlot,
}

/// One entry of the `queued` count. Released exactly once, either by the
/// scheduler loop when it pops the entry or by the waiter when it withdraws.
#[derive(Clone)]
struct QueueSlot {
    released: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
}

impl QueueSlot {
    fn take(queued: &Arc<AtomicUsize>) -> Self {
        queued.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            released: Arc::new(AtomicBool::new(false)),
            queued: queued.clone(),
        }
    }

    fn release(&self) {
        if !self.released.swap(true, AtomicOrdering::AcqRel) {
            self.queued.fetch_sub(1, AtomicOrdering::Relaxed);
        }
    }
}

// withdrawing waiters leave the count immediately, even though their heap
// entry is only discarded once a permit frees up
struct WaiterGuard(QueueSlot);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl PartialEq for QueuedFetch {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedFetch {}

impl PartialOrd for QueuedFetch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedFetch {
    // max-heap: higher priority first, then lower sequence number first
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Hands out fetch permits in priority order.
pub struct FetchScheduler {
    command_tx: mpsc::UnboundedSender<QueuedFetch>,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("max_concurrent", &self.max_concurrent)
            .field("queued", &self.queued_len())
            .finish_non_exhaustive()
    }
}

impl FetchScheduler {
    /// Starts the scheduler loop. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let queued = Arc::new(AtomicUsize::new(0));

        tokio::spawn(Self::run_loop(command_rx, semaphore.clone()));

        Self {
            command_tx,
            semaphore,
            queued,
            max_concurrent,
        }
    }

    /// Waits for a fetch permit. `seq` is the submission order of the request.
    ///
    /// Returns `None` if the scheduler has shut down. Dropping the returned
    /// future withdraws the fetch from the queue.
    pub async fn acquire(
        &self,
        key: CacheKey,
        priority: Priority,
        seq: u64,
    ) -> Option<OwnedSemaphorePermit> {
        let (grant, granted) = oneshot::channel();
        let slot = QueueSlot::take(&self.queued);
        let _guard = WaiterGuard(slot.clone());
        self.command_tx
            .send(QueuedFetch {
                key,
                priority,
                seq,
                grant,
                slot,
            })
            .ok()?;
        granted.await.ok()
    }

    /// Number of fetches waiting for a permit.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.load(AtomicOrdering::Relaxed)
    }

    /// Number of fetches currently holding a permit.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    async fn run_loop(
        mut command_rx: mpsc::UnboundedReceiver<QueuedFetch>,
        semaphore: Arc<Semaphore>,
    ) {
        let mut heap: BinaryHeap<QueuedFetch> = BinaryHeap::new();

        loop {
            tokio::select! {
                biased;
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(job) => {
                            trace!(key = %job.key, priority = %job.priority, seq = job.seq, "Fetch queued");
                            heap.push(job);
                        }
                        None => break,
                    }
                }
                permit = semaphore.clone().acquire_owned(), if !heap.is_empty() => {
                    let Ok(permit) = permit else { break };
                    // withdrawn fetches hand their permit straight back
                    while let Some(job) = heap.pop() {
                        job.slot.release();
                        if job.grant.is_closed() {
                            trace!(key = %job.key, "Skipping withdrawn fetch");
                            continue;
                        }
                        debug!(key = %job.key, priority = %job.priority, "Fetch admitted");
                        if let Err(permit) = job.grant.send(permit) {
                            drop(permit);
                        }
                        break;
                    }
                }
            }
        }

        debug!("Fetch scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::CachePolicy;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(name, CachePolicy::Immutable)
    }

    #[tokio::test]
    async fn test_grants_up_to_limit() {
        let scheduler = FetchScheduler::new(2);
        let a = scheduler.acquire(key("a"), Priority::Normal, 0).await;
        let b = scheduler.acquire(key("b"), Priority::Normal, 1).await;
        assert!(a.is_some() && b.is_some());
        assert_eq!(scheduler.active_len(), 2);

        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            scheduler.acquire(key("c"), Priority::Normal, 2),
        )
        .await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_high_priority_admitted_first() {
        let scheduler = Arc::new(FetchScheduler::new(1));
        let blocker = scheduler.acquire(key("blocker"), Priority::Low, 0).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for (name, priority, seq) in [
            ("n1", Priority::Normal, 1),
            ("n2", Priority::Normal, 2),
            ("h", Priority::High, 3),
        ] {
            let scheduler = scheduler.clone();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let permit = scheduler.acquire(key(name), priority, seq).await;
                let _ = order_tx.send(name);
                drop(permit);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.queued_len(), 3);
        drop(blocker);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(order_rx.recv().await.unwrap());
        }
        assert_eq!(order, vec!["h", "n1", "n2"]);
    }

    #[tokio::test]
    async fn test_withdrawn_fetch_does_not_leak_permit() {
        let scheduler = FetchScheduler::new(1);
        let blocker = scheduler.acquire(key("blocker"), Priority::Normal, 0).await.unwrap();

        let withdrawn = tokio::time::timeout(
            Duration::from_millis(20),
            scheduler.acquire(key("gone"), Priority::High, 1),
        )
        .await;
        assert!(withdrawn.is_err());
        drop(blocker);

        let next = tokio::time::timeout(
            Duration::from_millis(200),
            scheduler.acquire(key("next"), Priority::Low, 2),
        )
        .await;
        assert!(matches!(next, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_waiter_stays_pending_until_permit_released() {
        let scheduler = FetchScheduler::new(1);
        let blocker = scheduler.acquire(key("blocker"), Priority::Normal, 0).await.unwrap();

        let mut waiter = tokio_test::task::spawn(scheduler.acquire(key("w"), Priority::Normal, 1));
        tokio_test::assert_pending!(waiter.poll());
        tokio::task::yield_now().await;
        tokio_test::assert_pending!(waiter.poll());
        assert_eq!(scheduler.queued_len(), 1);

        drop(blocker);
        let permit = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap();
        assert!(permit.is_some());
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_withdrawn_waiter_leaves_queue_count() {
        let scheduler = FetchScheduler::new(1);
        let _blocker = scheduler.acquire(key("blocker"), Priority::Normal, 0).await.unwrap();

        let mut waiter = tokio_test::task::spawn(scheduler.acquire(key("w"), Priority::Normal, 1));
        tokio_test::assert_pending!(waiter.poll());
        assert_eq!(scheduler.queued_len(), 1);

        drop(waiter);
        assert_eq!(scheduler.queued_len(), 0);
        assert_eq!(scheduler.active_len(), 1);
    }
}
