//! Projection runner: ordering, deduplication and rebuild around a projection.
//!
//! Read models are **disposable**; events are the source of truth. The runner
//! turns an at-least-once, possibly reordered stream of committed envelopes into
//! an exactly-once, per-aggregate ordered feed for one projection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use proofing_core::AggregateId;

use crate::{CursorStore, EventEnvelope, InMemoryCursorStore, Projection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {event_type} payload: {message}")]
    Deserialize { event_type: String, message: String },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("history for {aggregate_id} has a gap after sequence {last}")]
    IncompleteHistory { aggregate_id: AggregateId, last: u64 },

    /// An update event arrived for a record the projection does not hold.
    #[error("no read model record for {aggregate_id}")]
    MissingRecord { aggregate_id: AggregateId },

    #[error("read model store failed: {0}")]
    Store(String),
}

impl ProjectionError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// One envelope that moved a projection's cursor forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEvent {
    pub aggregate_id: AggregateId,
    pub sequence_number: u64,
    pub event_type: String,
    /// `false` when the projection has no handler for this event type.
    pub handled: bool,
}

/// A parked envelope whose replay failed.
///
/// It is no longer parked: the caller owns it and must re-submit it through
/// [`ProjectionRunner::apply`] once the failure is resolved. Later envelopes for
/// the same aggregate stay parked behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledEnvelope {
    pub envelope: EventEnvelope<JsonValue>,
    pub error: ProjectionError,
}

/// What one pass over an aggregate's ready envelopes achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Envelopes that moved the cursor, in order.
    pub applied: Vec<AppliedEvent>,
    pub stalled: Vec<StalledEnvelope>,
}

impl Progress {
    fn extend(&mut self, other: Progress) {
        self.applied.extend(other.applied);
        self.stalled.extend(other.stalled);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The envelope (and any parked successors it unblocked) were applied, in order.
    Applied(Progress),
    /// Already applied earlier; nothing changed.
    Duplicate,
    /// Arrived ahead of its predecessor; held until the gap is filled.
    Parked,
}

/// Runs envelopes through a projection and tracks per-aggregate progress.
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursors: Arc<dyn CursorStore>,
    parked: HashMap<AggregateId, BTreeMap<u64, EventEnvelope<JsonValue>>>,
}

impl<P> core::fmt::Debug for ProjectionRunner<P>
where
    P: Projection + core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionRunner")
            .field("projection", &self.projection)
            .field("parked", &self.parked_count())
            .finish()
    }
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    /// Runner with process-local cursors.
    pub fn new(projection: P) -> Self {
        Self::with_cursor_store(projection, Arc::new(InMemoryCursorStore::new()))
    }

    pub fn with_cursor_store(projection: P, cursors: Arc<dyn CursorStore>) -> Self {
        Self {
            projection,
            cursors,
            parked: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.projection.name()
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Last applied sequence number for one aggregate (0 if none).
    pub fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .get_cursor(self.projection.name(), aggregate_id)
            .unwrap_or(0)
    }

    /// Number of envelopes waiting for a predecessor.
    pub fn parked_count(&self) -> usize {
        self.parked.values().map(BTreeMap::len).sum()
    }

    /// Apply a single committed envelope.
    ///
    /// - sequence ≤ cursor: duplicate, ignored
    /// - sequence = cursor + 1: applied, then parked successors are drained
    /// - sequence > cursor + 1: parked
    pub fn apply(&mut self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let found = envelope.sequence_number();
        let last = self.cursor(aggregate_id);

        if found == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found });
        }
        if found <= last {
            debug!(projection = self.name(), %aggregate_id, sequence = found, "duplicate envelope skipped");
            return Ok(ApplyOutcome::Duplicate);
        }
        if found > last + 1 {
            debug!(projection = self.name(), %aggregate_id, last, found, "envelope parked until gap is filled");
            self.parked
                .entry(aggregate_id)
                .or_default()
                .insert(found, envelope.clone());
            return Ok(ApplyOutcome::Parked);
        }

        let mut progress = Progress {
            applied: vec![self.apply_next(envelope)?],
            stalled: Vec::new(),
        };
        progress.extend(self.drain_parked(aggregate_id));
        Ok(ApplyOutcome::Applied(progress))
    }

    /// Re-attempt parked envelopes whose predecessor has since been applied.
    pub fn retry_parked(&mut self) -> Progress {
        let ids: Vec<AggregateId> = self.parked.keys().copied().collect();
        let mut progress = Progress::default();
        for id in ids {
            progress.extend(self.drain_parked(id));
        }
        progress
    }

    /// Empty the read model, its cursors and anything parked.
    pub fn reset(&mut self) -> Result<(), ProjectionError> {
        self.projection.reset()?;
        self.cursors.clear_cursors(self.projection.name());
        self.parked.clear();
        Ok(())
    }

    /// Rebuild from scratch by replaying the full committed history.
    ///
    /// Envelopes must be in commit order (each aggregate's events ascending).
    /// Returns the number of envelopes applied.
    pub fn rebuild<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<JsonValue>>,
    ) -> Result<u64, ProjectionError> {
        self.reset()?;
        let mut count = 0u64;
        for envelope in envelopes {
            if let ApplyOutcome::Applied(progress) = self.apply(envelope)? {
                count += progress.applied.len() as u64;
                if let Some(stalled) = progress.stalled.into_iter().next() {
                    return Err(stalled.error);
                }
            }
        }

        if let Some((aggregate_id, _)) = self.parked.iter().find(|(_, p)| !p.is_empty()) {
            let aggregate_id = *aggregate_id;
            return Err(ProjectionError::IncompleteHistory {
                aggregate_id,
                last: self.cursor(aggregate_id),
            });
        }
        Ok(count)
    }

    fn apply_next(&mut self, envelope: &EventEnvelope<JsonValue>) -> Result<AppliedEvent, ProjectionError> {
        let handled = self.projection.handles(envelope.event_type());
        if handled {
            let typed: P::Ev = serde_json::from_value(envelope.payload().clone()).map_err(|e| {
                ProjectionError::Deserialize {
                    event_type: envelope.event_type().to_string(),
                    message: e.to_string(),
                }
            })?;
            self.projection.apply(&envelope.with_payload(typed))?;
        }

        self.cursors.update_cursor(
            self.projection.name(),
            envelope.aggregate_id(),
            envelope.sequence_number(),
        );

        Ok(AppliedEvent {
            aggregate_id: envelope.aggregate_id(),
            sequence_number: envelope.sequence_number(),
            event_type: envelope.event_type().to_string(),
            handled,
        })
    }

    fn drain_parked(&mut self, aggregate_id: AggregateId) -> Progress {
        let mut progress = Progress::default();
        loop {
            let next = self.cursor(aggregate_id) + 1;
            let Some(envelope) = self
                .parked
                .get_mut(&aggregate_id)
                .and_then(|parked| parked.remove(&next))
            else {
                break;
            };

            match self.apply_next(&envelope) {
                Ok(event) => progress.applied.push(event),
                Err(error) => {
                    warn!(projection = self.name(), %aggregate_id, sequence = next, %error, "parked envelope failed; handing it back");
                    progress.stalled.push(StalledEnvelope { envelope, error });
                    break;
                }
            }
        }

        // Anything at or below the cursor is now a duplicate.
        let cursor = self.cursor(aggregate_id);
        if let Some(parked) = self.parked.get_mut(&aggregate_id) {
            parked.retain(|seq, _| *seq > cursor);
            if parked.is_empty() {
                self.parked.remove(&aggregate_id);
            }
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::*;
    use crate::Event;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    enum NoteEvent {
        Written { id: AggregateId, text: String },
        Edited { id: AggregateId, text: String },
    }

    impl Event for NoteEvent {
        fn event_type(&self) -> &'static str {
            match self {
                NoteEvent::Written { .. } => "notes.written",
                NoteEvent::Edited { .. } => "notes.edited",
            }
        }

        fn version(&self) -> u32 {
            1
        }

        fn aggregate_id(&self) -> AggregateId {
            match self {
                NoteEvent::Written { id, .. } | NoteEvent::Edited { id, .. } => *id,
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(0, 0).unwrap()
        }
    }

    #[derive(Debug, Default)]
    struct NotesProjection {
        texts: BTreeMap<AggregateId, String>,
        applied: u32,
        /// Text the backing store refuses to write.
        rejects: Option<String>,
    }

    impl Projection for NotesProjection {
        type Ev = NoteEvent;

        fn name(&self) -> &'static str {
            "notes"
        }

        fn handles(&self, event_type: &str) -> bool {
            matches!(event_type, "notes.written" | "notes.edited")
        }

        fn apply(&mut self, envelope: &EventEnvelope<NoteEvent>) -> Result<(), ProjectionError> {
            match envelope.payload() {
                NoteEvent::Written { id, text } | NoteEvent::Edited { id, text } => {
                    if self.rejects.as_deref() == Some(text.as_str()) {
                        return Err(ProjectionError::store("write rejected"));
                    }
                    self.texts.insert(*id, text.clone());
                }
            }
            self.applied += 1;
            Ok(())
        }

        fn reset(&mut self) -> Result<(), ProjectionError> {
            self.texts.clear();
            self.applied = 0;
            Ok(())
        }
    }

    fn envelope(id: AggregateId, seq: u64, event: NoteEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            id,
            "notes.note",
            seq,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn raw(id: AggregateId, seq: u64, event_type: &str) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            id,
            "notes.note",
            seq,
            event_type,
            Utc.timestamp_opt(0, 0).unwrap(),
            serde_json::json!({ "unknown": true }),
        )
    }

    #[test]
    fn duplicates_are_applied_once() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection::default());
        let env = envelope(id, 1, NoteEvent::Written { id, text: "a".into() });

        assert!(matches!(runner.apply(&env).unwrap(), ApplyOutcome::Applied(_)));
        assert_eq!(runner.apply(&env).unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(runner.projection().applied, 1);
        assert_eq!(runner.cursor(id), 1);
    }

    #[test]
    fn out_of_order_envelopes_are_parked_then_drained() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection::default());
        let first = envelope(id, 1, NoteEvent::Written { id, text: "a".into() });
        let second = envelope(id, 2, NoteEvent::Edited { id, text: "b".into() });
        let third = envelope(id, 3, NoteEvent::Edited { id, text: "c".into() });

        assert_eq!(runner.apply(&third).unwrap(), ApplyOutcome::Parked);
        assert_eq!(runner.apply(&second).unwrap(), ApplyOutcome::Parked);
        assert_eq!(runner.parked_count(), 2);

        match runner.apply(&first).unwrap() {
            ApplyOutcome::Applied(progress) => {
                let seqs: Vec<u64> = progress.applied.iter().map(|a| a.sequence_number).collect();
                assert_eq!(seqs, vec![1, 2, 3]);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(runner.parked_count(), 0);
        assert_eq!(runner.projection().texts.get(&id).map(String::as_str), Some("c"));
    }

    #[test]
    fn failed_parked_envelope_is_handed_back_not_reparked() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection {
            rejects: Some("b".into()),
            ..NotesProjection::default()
        });
        let first = envelope(id, 1, NoteEvent::Written { id, text: "a".into() });
        let second = envelope(id, 2, NoteEvent::Edited { id, text: "b".into() });
        let third = envelope(id, 3, NoteEvent::Edited { id, text: "c".into() });
        runner.apply(&third).unwrap();
        runner.apply(&second).unwrap();

        let ApplyOutcome::Applied(progress) = runner.apply(&first).unwrap() else {
            panic!("expected Applied");
        };
        assert_eq!(progress.applied.len(), 1);
        assert_eq!(progress.stalled.len(), 1);
        assert_eq!(progress.stalled[0].envelope, second);
        assert_eq!(runner.parked_count(), 1);
        assert_eq!(runner.cursor(id), 1);
        assert!(runner.retry_parked().applied.is_empty());

        runner.projection.rejects = None;
        let ApplyOutcome::Applied(progress) = runner.apply(&progress.stalled[0].envelope).unwrap() else {
            panic!("expected Applied");
        };
        let seqs: Vec<u64> = progress.applied.iter().map(|a| a.sequence_number).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(runner.parked_count(), 0);
        assert_eq!(runner.projection().texts.get(&id).map(String::as_str), Some("c"));
    }

    #[test]
    fn unknown_event_types_advance_the_cursor_silently() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection::default());
        runner
            .apply(&envelope(id, 1, NoteEvent::Written { id, text: "a".into() }))
            .unwrap();

        match runner.apply(&raw(id, 2, "notes.archived")).unwrap() {
            ApplyOutcome::Applied(progress) => assert!(!progress.applied[0].handled),
            other => panic!("expected Applied, got {other:?}"),
        }
        runner
            .apply(&envelope(id, 3, NoteEvent::Edited { id, text: "b".into() }))
            .unwrap();

        assert_eq!(runner.cursor(id), 3);
        assert_eq!(runner.projection().applied, 2);
    }

    #[test]
    fn undecodable_payload_does_not_move_the_cursor() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection::default());

        let err = runner.apply(&raw(id, 1, "notes.written")).unwrap_err();
        assert!(matches!(err, ProjectionError::Deserialize { .. }));
        assert_eq!(runner.cursor(id), 0);
    }

    #[test]
    fn sequence_zero_is_rejected() {
        let id = AggregateId::new();
        let mut runner = ProjectionRunner::new(NotesProjection::default());
        let err = runner
            .apply(&envelope(id, 0, NoteEvent::Written { id, text: "a".into() }))
            .unwrap_err();
        assert_eq!(err, ProjectionError::NonMonotonicSequence { last: 0, found: 0 });
    }

    #[test]
    fn rebuild_matches_incremental_application() {
        let a = AggregateId::new();
        let b = AggregateId::new();
        let history = vec![
            envelope(a, 1, NoteEvent::Written { id: a, text: "a1".into() }),
            envelope(b, 1, NoteEvent::Written { id: b, text: "b1".into() }),
            envelope(a, 2, NoteEvent::Edited { id: a, text: "a2".into() }),
        ];

        let mut incremental = ProjectionRunner::new(NotesProjection::default());
        for env in &history {
            incremental.apply(env).unwrap();
        }

        let mut rebuilt = ProjectionRunner::new(NotesProjection::default());
        rebuilt.apply(&history[0]).unwrap();
        assert_eq!(rebuilt.rebuild(&history).unwrap(), 3);
        assert_eq!(rebuilt.rebuild(&history).unwrap(), 3);

        assert_eq!(incremental.projection().texts, rebuilt.projection().texts);
    }

    #[test]
    fn rebuild_reports_gaps() {
        let a = AggregateId::new();
        let history = vec![
            envelope(a, 1, NoteEvent::Written { id: a, text: "a1".into() }),
            envelope(a, 3, NoteEvent::Edited { id: a, text: "a3".into() }),
        ];

        let mut runner = ProjectionRunner::new(NotesProjection::default());
        let err = runner.rebuild(&history).unwrap_err();
        assert_eq!(err, ProjectionError::IncompleteHistory { aggregate_id: a, last: 1 });
    }
}
