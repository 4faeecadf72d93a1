//! Append-only event store boundary.
//!
//! Storage-agnostic contract plus the in-memory and Postgres implementations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use proofing_core::{AggregateId, ExpectedVersion};
use proofing_events::{EventBus, EventEnvelope};
use serde_json::Value as JsonValue;
use tracing::warn;

/// Adapter that publishes committed events to an `EventBus` after a successful append.
///
/// Ordering invariant: **publish happens only after append succeeds**. A failed
/// publish does not fail the append (the events are already durable); it is
/// logged and a catch-up from the store repairs the subscriber.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // 1) Append (durable step)
        let committed = self.store.append(aggregate_id, expected_version, events)?;

        // 2) Publish committed events (best-effort; at-least-once)
        for e in &committed {
            if let Err(err) = self.bus.publish(e.to_envelope()) {
                warn!(
                    %aggregate_id,
                    sequence = e.sequence_number,
                    error = ?err,
                    "failed to publish committed event"
                );
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_all()
    }
}
