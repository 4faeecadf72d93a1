//! Projection cursor (checkpoint) tracking.
//!
//! A cursor is the last sequence number a projection applied for one aggregate
//! stream. It is what makes delivery exactly-once on top of an at-least-once
//! transport, and what lets a projection resume after a restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use proofing_core::AggregateId;

/// Cursor persistence for projections.
pub trait CursorStore: Send + Sync {
    /// Last applied sequence number for a (projection, aggregate) stream.
    fn get_cursor(&self, projection_name: &str, aggregate_id: AggregateId) -> Option<u64>;

    fn update_cursor(&self, projection_name: &str, aggregate_id: AggregateId, sequence_number: u64);

    /// Forget every cursor of a projection (rebuild support).
    fn clear_cursors(&self, projection_name: &str);
}

impl<C> CursorStore for Arc<C>
where
    C: CursorStore + ?Sized,
{
    fn get_cursor(&self, projection_name: &str, aggregate_id: AggregateId) -> Option<u64> {
        (**self).get_cursor(projection_name, aggregate_id)
    }

    fn update_cursor(&self, projection_name: &str, aggregate_id: AggregateId, sequence_number: u64) {
        (**self).update_cursor(projection_name, aggregate_id, sequence_number)
    }

    fn clear_cursors(&self, projection_name: &str) {
        (**self).clear_cursors(projection_name)
    }
}

/// Process-local cursors (tests/dev, or projections that are rebuilt on start).
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(String, AggregateId), u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn get_cursor(&self, projection_name: &str, aggregate_id: AggregateId) -> Option<u64> {
        let cursors = self.cursors.read().ok()?;
        cursors.get(&(projection_name.to_string(), aggregate_id)).copied()
    }

    fn update_cursor(&self, projection_name: &str, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert((projection_name.to_string(), aggregate_id), sequence_number);
        }
    }

    fn clear_cursors(&self, projection_name: &str) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|(name, _), _| name != projection_name);
        }
    }
}
