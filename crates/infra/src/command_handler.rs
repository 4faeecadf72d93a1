//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load + rehydrate the aggregate (repository, full replay)
//!   ↓
//! 2. Invoke the behavior for the command (records events on the aggregate)
//!   ↓
//! 3. Commit the uncommitted buffer (optimistic concurrency check)
//!   ↓        └─ concurrency conflict → back to 1, bounded by `RetryConfig`
//! 4. Dispatch committed events to the projector registry (synchronous mode)
//! ```
//!
//! Domain code stays pure: all IO goes through the injected `EventStore`.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use proofing_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use proofing_events::{Command, CommandTarget, Event};

use crate::config::RetryConfig;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::projections::ProjectorRegistry;
use crate::repository::Repository;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A business precondition failed. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The command targets an aggregate with no events.
    #[error("aggregate {0} not found")]
    NotFound(AggregateId),

    /// A creation command targeted an id that already has a stream.
    #[error("aggregate {0} already exists")]
    AlreadyExists(AggregateId),

    /// A single append lost the optimistic concurrency race.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Every attempt lost the race; the command was not applied.
    #[error("aggregate {aggregate_id} still conflicting after {attempts} attempts")]
    Conflict { aggregate_id: AggregateId, attempts: u32 },

    /// A historical payload no longer decodes into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The loaded stream is not a gapless run starting at 1.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl DispatchError {
    /// Map a domain error raised while handling a command for `aggregate_id`.
    pub fn from_domain(aggregate_id: AggregateId, err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound => DispatchError::NotFound(aggregate_id),
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub aggregate_id: AggregateId,
    /// Stream version after the commit.
    pub version: u64,
    /// Events appended by this command, with their sequence numbers.
    pub committed: Vec<StoredEvent>,
    /// Attempts it took (1 unless a concurrency conflict forced a retry).
    pub attempts: u32,
}

/// Entry point the request layer calls to change an aggregate.
///
/// Each `handle` call is an independent unit of work: commands for different
/// aggregates run fully in parallel, same-aggregate races are settled by the
/// store's append-time check and resolved here by reloading and retrying.
pub struct CommandHandler<S> {
    repository: Repository<S>,
    projectors: Option<Arc<ProjectorRegistry>>,
    retry: RetryConfig,
}

impl<S> core::fmt::Debug for CommandHandler<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("retry", &self.retry)
            .field("synchronous_projection", &self.projectors.is_some())
            .finish()
    }
}

impl<S> CommandHandler<S>
where
    S: EventStore,
{
    pub fn new(store: S, retry: RetryConfig) -> Self {
        Self {
            repository: Repository::new(store),
            projectors: None,
            retry,
        }
    }

    /// Dispatch committed events to `registry` before `handle` returns.
    pub fn with_projectors(mut self, registry: Arc<ProjectorRegistry>) -> Self {
        self.projectors = Some(registry);
        self
    }

    pub fn repository(&self) -> &Repository<S> {
        &self.repository
    }

    pub fn store(&self) -> &S {
        self.repository.store()
    }

    /// Handle one command: load, invoke, commit, retrying on concurrency conflicts.
    #[instrument(skip(self, command), fields(command = ?command), err)]
    pub fn handle<C>(&self, command: C) -> Result<CommandOutcome, DispatchError>
    where
        C: Command,
        C::Aggregate: Aggregate<Error = DomainError>,
        <C::Aggregate as Aggregate>::Event: Event + Serialize + DeserializeOwned,
    {
        let target = command.target();
        let aggregate_id = target.aggregate_id().unwrap_or_default();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.attempt::<C::Aggregate>(target, aggregate_id, &command) {
                Ok(committed) => {
                    let version = committed
                        .last()
                        .map(|e| e.sequence_number)
                        .unwrap_or_default();
                    debug!(%aggregate_id, version, events = committed.len(), attempt, "command committed");
                    self.dispatch_to_projectors(&committed);
                    return Ok(CommandOutcome {
                        aggregate_id,
                        version,
                        committed,
                        attempts: attempt,
                    });
                }
                Err(DispatchError::Concurrency(_)) if matches!(target, CommandTarget::Create(_)) => {
                    return Err(DispatchError::AlreadyExists(aggregate_id));
                }
                Err(DispatchError::Concurrency(reason)) => {
                    if attempt >= max_attempts {
                        warn!(%aggregate_id, attempts = attempt, %reason, "giving up after repeated concurrency conflicts");
                        return Err(DispatchError::Conflict {
                            aggregate_id,
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay_after(attempt);
                    warn!(%aggregate_id, attempt, %reason, delay_ms = delay.as_millis() as u64, "concurrency conflict; reloading and retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One load-invoke-commit cycle against fresh state.
    fn attempt<A>(
        &self,
        target: CommandTarget,
        aggregate_id: AggregateId,
        command: &A::Command,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = match target {
            CommandTarget::Create(_) => A::new(aggregate_id),
            CommandTarget::Existing(_) => self.repository.load::<A>(aggregate_id)?,
        };
        debug_assert_eq!(aggregate.id(), aggregate_id);

        aggregate
            .handle(command)
            .map_err(|e| DispatchError::from_domain(aggregate_id, e))?;

        self.repository.commit(&mut aggregate)
    }

    fn dispatch_to_projectors(&self, committed: &[StoredEvent]) {
        let Some(registry) = &self.projectors else {
            return;
        };
        for stored in committed {
            registry.dispatch(&stored.to_envelope());
        }
    }
}
