//! Aggregate root contract for event-sourced domain models.

use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Returns the aggregate identifier.
    fn id(&self) -> AggregateId;

    /// Number of events applied to this instance (persisted + uncommitted).
    ///
    /// Starts at 0 for a fresh instance and grows by exactly 1 per applied event.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an append.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, tooling).
    Any,
    /// Require the stream to be at an exact sequence number.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Events recorded by behavior methods during the current command, not yet
/// handed to the event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvents<E> {
    events: Vec<E>,
}

impl<E> UncommittedEvents<E> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl<E> Default for UncommittedEvents<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Event-sourced aggregate capability set.
///
/// - **State mutation**: `apply(&mut self, event)` is the only way fields change.
///   It must be pure and deterministic (no clock reads, no randomness, no IO) and
///   must bump `version()` by one.
/// - **Behavior**: `handle(&mut self, command)` routes a command to exactly one
///   behavior method. Behavior methods validate against current state and, on
///   success, call [`Aggregate::record`] so later calls in the same command see
///   the updated state. On failure nothing is recorded.
pub trait Aggregate: AggregateRoot + Sized {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Stable aggregate type identifier (e.g. "profiles.profile").
    const AGGREGATE_TYPE: &'static str;

    /// A fresh instance at sequence 0 with nothing applied.
    fn new(id: AggregateId) -> Self;

    /// Evolve in-memory state from a single event.
    fn apply(&mut self, event: &Self::Event);

    /// Invoke the behavior method matching the command's intent.
    fn handle(&mut self, command: &Self::Command) -> Result<(), Self::Error>;

    fn uncommitted(&self) -> &UncommittedEvents<Self::Event>;

    fn uncommitted_mut(&mut self) -> &mut UncommittedEvents<Self::Event>;

    /// Rehydrate an instance by folding its history in order.
    fn load<'a>(id: AggregateId, history: impl IntoIterator<Item = &'a Self::Event>) -> Self
    where
        Self::Event: 'a,
    {
        let mut aggregate = Self::new(id);
        for event in history {
            aggregate.apply(event);
        }
        aggregate
    }

    /// Apply a freshly decided event and buffer it for commit.
    fn record(&mut self, event: Self::Event) {
        self.apply(&event);
        self.uncommitted_mut().push(event);
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        self.uncommitted().as_slice()
    }

    /// Sequence number of the last persisted event this instance has seen.
    ///
    /// This is the expectation used for the optimistic concurrency check.
    fn committed_version(&self) -> u64 {
        self.version() - self.uncommitted().len() as u64
    }

    /// Drop the uncommitted buffer after a successful append.
    fn mark_committed(&mut self) {
        self.uncommitted_mut().clear();
    }
}
