//! The epistemic event bus.
//!
//! Typed pub/sub with synchronous delivery on the publishing flow. Observer
//! failures are logged and never propagated; registration and dispatch are
//! serialized behind one lock.

pub mod sqlite_observer;
pub mod vector_observer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::EpistemicEvent;
use crate::domain::ports::EpistemicObserver;

pub use sqlite_observer::SqliteEventObserver;
pub use vector_observer::VectorEventObserver;

/// Central bus. Cheap to clone; clones share the observer list and counters.
#[derive(Clone, Default)]
pub struct EpistemicBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    observers: RwLock<Vec<Arc<dyn EpistemicObserver>>>,
    event_count: AtomicU64,
}

impl EpistemicBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn EpistemicObserver>) {
        let mut observers = self.inner.observers.write().await;
        debug!(observer = observer.name(), "bus: observer subscribed");
        observers.push(observer);
    }

    /// Deliver an event to every observer, in subscription order, on this
    /// flow. A failing observer is logged and skipped.
    pub async fn publish(&self, event: EpistemicEvent) {
        self.inner.event_count.fetch_add(1, Ordering::SeqCst);

        let observers = self.inner.observers.read().await;
        for observer in observers.iter() {
            if let Err(e) = observer.handle_event(&event).await {
                warn!(
                    observer = observer.name(),
                    event_type = event.event_type.as_str(),
                    error = %e,
                    "bus: observer failed handling event"
                );
            }
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }

    pub fn event_count(&self) -> u64 {
        self.inner.event_count.load(Ordering::SeqCst)
    }
}
