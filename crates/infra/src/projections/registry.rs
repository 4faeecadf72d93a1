//! Projector registry: the dispatch pipeline from committed events to read models.
//!
//! Built once at start-up and shared (`Arc`) between the command handler
//! (synchronous dispatch) and the projection worker (asynchronous dispatch).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use proofing_core::AggregateId;
use proofing_events::{
    AppliedEvent, ApplyOutcome, EventBus, EventEnvelope, InMemoryEventBus, Progress, Projection, ProjectionError,
    ProjectionRunner, Subscription,
};

use crate::event_store::{EventStore, EventStoreError};

/// Object-safe view of a [`ProjectionRunner`], so one registry can hold
/// runners for different projections.
pub trait Projector: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, ProjectionError>;

    fn retry_parked(&mut self) -> Progress;

    fn rebuild(&mut self, envelopes: &[EventEnvelope<JsonValue>]) -> Result<u64, ProjectionError>;

    fn parked_count(&self) -> usize;
}

impl<P> Projector for ProjectionRunner<P>
where
    P: Projection + 'static,
{
    fn name(&self) -> &'static str {
        ProjectionRunner::name(self)
    }

    fn apply(&mut self, envelope: &EventEnvelope<JsonValue>) -> Result<ApplyOutcome, ProjectionError> {
        ProjectionRunner::apply(self, envelope)
    }

    fn retry_parked(&mut self) -> Progress {
        ProjectionRunner::retry_parked(self)
    }

    fn rebuild(&mut self, envelopes: &[EventEnvelope<JsonValue>]) -> Result<u64, ProjectionError> {
        ProjectionRunner::rebuild(self, envelopes)
    }

    fn parked_count(&self) -> usize {
        ProjectionRunner::parked_count(self)
    }
}

/// "Projection updated" signal, published after an event changed a read model.
///
/// External push delivery consumes only this signal, never raw events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionUpdated {
    pub projection: &'static str,
    pub aggregate_id: AggregateId,
    pub sequence_number: u64,
    pub event_type: String,
}

/// A projection update that failed and awaits reprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedProjection {
    pub projection: &'static str,
    pub envelope: EventEnvelope<JsonValue>,
    pub error: ProjectionError,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("failed to read the event log: {0}")]
    Store(#[from] EventStoreError),

    #[error("projection {projection} failed to rebuild: {source}")]
    Projection {
        projection: &'static str,
        #[source]
        source: ProjectionError,
    },
}

/// Registry of projectors plus the reprocessing queue for failed updates.
///
/// Each projector sits behind its own lock: same-projection updates are
/// serialized (which keeps per-aggregate order), different projections run
/// independently. A failure never propagates to the command that produced the
/// event; it is logged and queued for [`ProjectorRegistry::retry_failed`].
pub struct ProjectorRegistry {
    projectors: Vec<Mutex<Box<dyn Projector>>>,
    failed: Mutex<Vec<FailedProjection>>,
    updates: Arc<InMemoryEventBus<ProjectionUpdated>>,
}

impl core::fmt::Debug for ProjectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectorRegistry")
            .field("projectors", &self.names())
            .field("failed", &self.failed_count())
            .finish()
    }
}

impl Default for ProjectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside a projector leaves its state as it was before the panic.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProjectorRegistry {
    pub fn new() -> Self {
        Self {
            projectors: Vec::new(),
            failed: Mutex::new(Vec::new()),
            updates: Arc::new(InMemoryEventBus::new()),
        }
    }

    pub fn with_projector(mut self, projector: impl Projector + 'static) -> Self {
        self.projectors.push(Mutex::new(Box::new(projector)));
        self
    }

    /// Publish update signals on a shared bus instead of a private one.
    pub fn with_updates_bus(mut self, bus: Arc<InMemoryEventBus<ProjectionUpdated>>) -> Self {
        self.updates = bus;
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.projectors.iter().map(|p| lock(p).name()).collect()
    }

    pub fn subscribe_updates(&self) -> Subscription<ProjectionUpdated> {
        self.updates.subscribe()
    }

    /// Apply one committed envelope to every projector.
    ///
    /// Returns the read-model updates it caused (including parked successors it
    /// unblocked). Failures are queued, not returned.
    pub fn dispatch(&self, envelope: &EventEnvelope<JsonValue>) -> Vec<ProjectionUpdated> {
        let mut updates = Vec::new();
        for projector in &self.projectors {
            let mut projector = lock(projector);
            let name = projector.name();
            match projector.apply(envelope) {
                Ok(ApplyOutcome::Applied(progress)) => {
                    updates.extend(self.settle(name, progress));
                }
                Ok(ApplyOutcome::Duplicate) | Ok(ApplyOutcome::Parked) => {}
                Err(error) => self.record_failure(name, envelope, error),
            }
        }
        updates
    }

    pub fn failed_count(&self) -> usize {
        lock(&self.failed).len()
    }

    pub fn failures(&self) -> Vec<FailedProjection> {
        lock(&self.failed).clone()
    }

    /// Reprocess queued failures, then anything parked behind them.
    ///
    /// Returns how many queued failures were resolved.
    pub fn retry_failed(&self) -> usize {
        let pending = std::mem::take(&mut *lock(&self.failed));
        let mut resolved = 0;

        for failure in pending {
            let Some(slot) = self.projectors.iter().find(|p| lock(p).name() == failure.projection) else {
                continue;
            };
            let mut projector = lock(slot);
            match projector.apply(&failure.envelope) {
                Ok(outcome) => {
                    if let ApplyOutcome::Applied(progress) = outcome {
                        self.settle(failure.projection, progress);
                    }
                    resolved += 1;
                }
                Err(error) => self.requeue(failure, error),
            }
        }
        self.drain_parked();

        if resolved > 0 {
            info!(resolved, remaining = self.failed_count(), "reprocessed failed projection updates");
        }
        resolved
    }

    /// Feed the whole log through every projector without resetting anything.
    ///
    /// Cursors make this safe to run at any time: already-applied events are
    /// skipped, missed ones are applied. Returns the number of envelopes read.
    pub fn catch_up<S>(&self, store: &S) -> Result<u64, EventStoreError>
    where
        S: EventStore + ?Sized,
    {
        let log = store.load_all()?;
        for stored in &log {
            self.dispatch(&stored.to_envelope());
        }
        self.drain_parked();
        debug!(events = log.len(), "projection catch-up complete");
        Ok(log.len() as u64)
    }

    /// Reset every projector and its cursors, then replay the full log in commit order.
    ///
    /// Events committed while the rebuild runs may be missed; run
    /// [`ProjectorRegistry::catch_up`] afterwards (or quiesce writers) to close that window.
    pub fn rebuild<S>(&self, store: &S) -> Result<u64, RebuildError>
    where
        S: EventStore + ?Sized,
    {
        let envelopes: Vec<EventEnvelope<JsonValue>> = store.load_all()?.iter().map(|e| e.to_envelope()).collect();
        let mut total = 0;

        for projector in &self.projectors {
            let mut projector = lock(projector);
            let name = projector.name();
            let applied = projector
                .rebuild(&envelopes)
                .map_err(|source| RebuildError::Projection { projection: name, source })?;
            lock(&self.failed).retain(|f| f.projection != name);
            info!(projection = name, applied, "projection rebuilt");
            total += applied;
        }
        Ok(total)
    }

    fn publish_updates(&self, projection: &'static str, applied: &[AppliedEvent]) -> Vec<ProjectionUpdated> {
        let mut updates = Vec::new();
        for event in applied.iter().filter(|a| a.handled) {
            let update = ProjectionUpdated {
                projection,
                aggregate_id: event.aggregate_id,
                sequence_number: event.sequence_number,
                event_type: event.event_type.clone(),
            };
            if let Err(err) = self.updates.publish(update.clone()) {
                warn!(projection, error = ?err, "failed to publish projection update");
            }
            updates.push(update);
        }
        updates
    }

    fn drain_parked(&self) {
        for projector in &self.projectors {
            let mut projector = lock(projector);
            let name = projector.name();
            let progress = projector.retry_parked();
            self.settle(name, progress);
        }
    }

    /// Publish what a pass applied and queue whatever stalled in it.
    fn settle(&self, projection: &'static str, progress: Progress) -> Vec<ProjectionUpdated> {
        let updates = self.publish_updates(projection, &progress.applied);
        for stalled in progress.stalled {
            self.record_failure(projection, &stalled.envelope, stalled.error);
        }
        updates
    }

    /// Queue a failed update. An envelope already queued for the same
    /// projection is updated in place instead of queued twice.
    fn record_failure(&self, projection: &'static str, envelope: &EventEnvelope<JsonValue>, error: ProjectionError) {
        let mut failed = lock(&self.failed);
        let attempts = match failed
            .iter_mut()
            .find(|f| f.projection == projection && f.envelope.event_id() == envelope.event_id())
        {
            Some(existing) => {
                existing.attempts += 1;
                existing.error = error.clone();
                existing.attempts
            }
            None => {
                failed.push(FailedProjection {
                    projection,
                    envelope: envelope.clone(),
                    error: error.clone(),
                    attempts: 1,
                });
                1
            }
        };
        warn!(
            projection,
            aggregate_id = %envelope.aggregate_id(),
            sequence = envelope.sequence_number(),
            event_type = envelope.event_type(),
            attempts,
            %error,
            "projection update failed; queued for reprocessing"
        );
    }

    fn requeue(&self, failure: FailedProjection, error: ProjectionError) {
        let mut failed = lock(&self.failed);
        if let Some(existing) = failed
            .iter_mut()
            .find(|f| f.projection == failure.projection && f.envelope.event_id() == failure.envelope.event_id())
        {
            existing.attempts += failure.attempts;
            existing.error = error;
            return;
        }
        warn!(
            projection = failure.projection,
            aggregate_id = %failure.envelope.aggregate_id(),
            sequence = failure.envelope.sequence_number(),
            attempts = failure.attempts + 1,
            %error,
            "projection update failed again"
        );
        failed.push(FailedProjection {
            attempts: failure.attempts + 1,
            error,
            ..failure
        });
    }
}
