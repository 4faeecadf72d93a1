use serde::de::DeserializeOwned;

use crate::{Event, EventEnvelope, ProjectionError};

/// A projection builds a read model from committed events (CQRS read side).
///
/// ## Contract
///
/// - `handles(event_type)` says which event types this projection reacts to.
///   Anything else is skipped without decoding the payload, so new event types
///   never break existing projections.
/// - `apply` performs idempotent upserts keyed by aggregate id: a creation event
///   inserts, later events touch only the fields they own.
/// - `reset` empties every table the projection owns (rebuild support).
///
/// Ordering and exactly-once delivery are not the projection's concern: the
/// [`ProjectionRunner`](crate::ProjectionRunner) feeds each aggregate's events
/// in sequence order, once.
///
/// Read models are **disposable**. The event log is the source of truth and a
/// projection can be rebuilt from it at any time.
pub trait Projection: Send {
    type Ev: Event + DeserializeOwned;

    /// Stable projection name (cursor key, log field).
    fn name(&self) -> &'static str;

    fn handles(&self, event_type: &str) -> bool;

    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>) -> Result<(), ProjectionError>;

    fn reset(&mut self) -> Result<(), ProjectionError>;
}
