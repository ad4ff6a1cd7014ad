//! Durable SQLite leg of bus persistence.
//!
//! Always active; the guaranteed fallback when the vector backend is down.
//! Like journaling to disk: slow but reliable.

use async_trait::async_trait;

use crate::domain::errors::KernelResult;
use crate::domain::models::EpistemicEvent;
use crate::domain::ports::EpistemicObserver;
use crate::storage::EventRepository;

pub struct SqliteEventObserver {
    events: EventRepository,
}

impl SqliteEventObserver {
    pub fn new(events: EventRepository) -> Self {
        Self { events }
    }
}

#[async_trait]
impl EpistemicObserver for SqliteEventObserver {
    fn name(&self) -> &str {
        "sqlite_events"
    }

    async fn handle_event(&self, event: &EpistemicEvent) -> KernelResult<()> {
        self.events.append(event).await?;
        Ok(())
    }
}
