use chrono::{DateTime, Utc};

use proofing_core::AggregateId;

/// A domain event: an immutable fact about one aggregate instance.
///
/// Events are:
/// - **immutable** (corrections are new compensating events)
/// - **versioned** (schema evolution)
/// - **append-only** (never updated or deleted once persisted)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "profiles.profile.minted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// The aggregate instance this fact belongs to.
    fn aggregate_id(&self) -> AggregateId;

    /// When the event occurred (business time, carried in the payload).
    fn occurred_at(&self) -> DateTime<Utc>;
}
