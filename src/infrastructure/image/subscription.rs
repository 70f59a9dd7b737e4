//! Consumer side of a load.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::entities::{CacheKey, LoadEvent, LoadedImage};
use crate::domain::errors::LoadError;
use crate::domain::ports::LoadListener;

use super::coordinator::{FlightKey, FlightRegistry};

/// Identifies one subscriber of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event stream of a single load.
///
/// Dropping the subscription before the outcome arrives unsubscribes it; the
/// underlying fetch is aborted once no subscriber remains.
pub struct LoadSubscription {
    id: SubscriptionId,
    flight: FlightKey,
    events: mpsc::UnboundedReceiver<LoadEvent>,
    registry: Option<Arc<FlightRegistry>>,
    finished: bool,
}

impl std::fmt::Debug for LoadSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSubscription")
            .field("id", &self.id)
            .field("flight", &self.flight)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl LoadSubscription {
    pub(crate) fn attached(
        id: SubscriptionId,
        flight: FlightKey,
        events: mpsc::UnboundedReceiver<LoadEvent>,
        registry: Arc<FlightRegistry>,
    ) -> Self {
        Self {
            id,
            flight,
            events,
            registry: Some(registry),
            finished: false,
        }
    }

    /// A subscription whose events are already queued in full.
    pub(crate) fn completed(
        id: SubscriptionId,
        flight: FlightKey,
        events: mpsc::UnboundedReceiver<LoadEvent>,
    ) -> Self {
        Self {
            id,
            flight,
            events,
            registry: None,
            finished: true,
        }
    }

    /// Subscriber identity within its flight.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cache key of the source being loaded.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.flight.key
    }

    /// Waits for the next event. `None` after `LoadEnd`.
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        let event = self.events.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<LoadEvent> {
        match self.events.try_recv() {
            Ok(event) => {
                self.observe(Some(&event));
                Some(event)
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.observe(None);
                None
            }
        }
    }

    /// Drains the stream and returns the outcome.
    ///
    /// # Errors
    /// Returns the `LoadError` delivered to this subscriber.
    pub async fn outcome(mut self) -> Result<LoadedImage, LoadError> {
        while let Some(event) = self.next_event().await {
            match event {
                LoadEvent::Load(image) => return Ok(image),
                LoadEvent::Error(error) => return Err(error),
                _ => {}
            }
        }
        Err(LoadError::network("load ended without an outcome"))
    }

    /// Dispatches every remaining event to `listener`, through `LoadEnd`.
    pub async fn forward_to(mut self, listener: &dyn LoadListener) {
        while let Some(event) = self.next_event().await {
            listener.dispatch(&event);
            if matches!(event, LoadEvent::LoadEnd) {
                break;
            }
        }
    }

    /// Stops receiving events for this load.
    pub fn cancel(self) {
        drop(self);
    }

    fn observe(&mut self, event: Option<&LoadEvent>) {
        if event.is_none_or(|e| e.is_terminal() || matches!(e, LoadEvent::LoadEnd)) {
            self.finished = true;
        }
    }
}

impl Stream for LoadSubscription {
    type Item = LoadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let event = ready!(self.events.poll_recv(cx));
        self.observe(event.as_ref());
        Poll::Ready(event)
    }
}

impl Drop for LoadSubscription {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(registry) = &self.registry {
            registry.unsubscribe(&self.flight, self.id);
        }
    }
}
