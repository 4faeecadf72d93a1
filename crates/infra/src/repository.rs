//! Repository: mediates between the command handler and the event store.
//!
//! - `load` fetches a stream, checks it is a gapless run from 1 and folds it
//!   through `Aggregate::apply`.
//! - `commit` appends the uncommitted buffer, expecting the version observed at
//!   load. The buffer is cleared on success and left untouched on failure.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use proofing_core::{Aggregate, AggregateId, AggregateRoot, ExpectedVersion};
use proofing_events::Event;

use crate::command_handler::DispatchError;
use crate::event_store::{EventStore, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub struct Repository<S> {
    store: S,
}

impl<S> Repository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> Repository<S>
where
    S: EventStore,
{
    /// Rehydrate an aggregate from its full history.
    ///
    /// The observed stream version is `aggregate.version()` (equivalently
    /// `committed_version()`, since nothing is buffered yet). An id with no
    /// events is `NotFound`.
    pub fn load<A>(&self, aggregate_id: AggregateId) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        if history.is_empty() {
            return Err(DispatchError::NotFound(aggregate_id));
        }
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = A::new(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Like [`Repository::load`], but an id with no history yields a fresh aggregate.
    pub fn load_or_new<A>(&self, aggregate_id: AggregateId) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        match self.load(aggregate_id) {
            Err(DispatchError::NotFound(_)) => Ok(A::new(aggregate_id)),
            other => other,
        }
    }

    /// Append the aggregate's uncommitted events atomically.
    pub fn commit<A>(&self, aggregate: &mut A) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate,
        A::Event: Event + Serialize,
    {
        if aggregate.uncommitted().is_empty() {
            return Ok(vec![]);
        }

        let aggregate_id = aggregate.id();
        let expected = ExpectedVersion::Exact(aggregate.committed_version());
        let uncommitted = aggregate
            .uncommitted_events()
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, A::AGGREGATE_TYPE, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(aggregate_id, expected, uncommitted)?;
        aggregate.mark_committed();

        debug!(
            %aggregate_id,
            aggregate_type = A::AGGREGATE_TYPE,
            expected = ?expected,
            committed = committed.len(),
            "events appended"
        );
        Ok(committed)
    }
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // A buggy backend must not hand us another stream or a gapped one.
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::CorruptStream(format!(
                "loaded stream for {aggregate_id} contains {} at index {idx}",
                e.aggregate_id
            )));
        }
        let expected = idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DispatchError::CorruptStream(format!(
                "expected sequence_number {expected} at index {idx}, found {}",
                e.sequence_number
            )));
        }
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = stored
            .decode()
            .map_err(|e| DispatchError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::{TimeZone, Utc};
    use proofing_core::UserId;
    use proofing_profiles::{IdvLevel, Profile, ProfileEvent};

    fn created(store: &InMemoryEventStore) -> AggregateId {
        let repo = Repository::new(store);
        let mut profile = Profile::new(AggregateId::new());
        profile
            .add(UserId::new(), Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .unwrap();
        repo.commit(&mut profile).unwrap();
        profile.id()
    }

    #[test]
    fn load_of_unknown_id_is_not_found() {
        let store = InMemoryEventStore::new();
        let repo = Repository::new(&store);
        let id = AggregateId::new();

        let err = repo.load::<Profile>(id).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(found) if found == id));
        assert_eq!(repo.load_or_new::<Profile>(id).unwrap().version(), 0);
    }

    #[test]
    fn commit_clears_the_buffer_and_load_observes_the_version() {
        let store = InMemoryEventStore::new();
        let id = created(&store);
        let repo = Repository::new(&store);

        let mut profile: Profile = repo.load(id).unwrap();
        assert_eq!(profile.version(), 1);
        assert!(profile.uncommitted_events().is_empty());

        profile
            .mint(Utc.timestamp_opt(1_700_000_100, 0).unwrap(), IdvLevel::InPerson)
            .unwrap();
        let committed = repo.commit(&mut profile).unwrap();

        assert_eq!(committed[0].sequence_number, 2);
        assert_eq!(committed[0].event_type, ProfileEvent::MINTED);
        assert!(profile.uncommitted_events().is_empty());
        assert_eq!(profile.committed_version(), 2);
    }

    #[test]
    fn failed_commit_leaves_the_buffer_untouched() {
        let store = InMemoryEventStore::new();
        let id = created(&store);
        let repo = Repository::new(&store);

        let mut stale: Profile = repo.load(id).unwrap();
        let mut fresh: Profile = repo.load(id).unwrap();
        let t = Utc.timestamp_opt(1_700_000_100, 0).unwrap();

        fresh.mint(t, IdvLevel::InPerson).unwrap();
        repo.commit(&mut fresh).unwrap();

        stale.mint(t, IdvLevel::LegacyUnsupervised).unwrap();
        let err = repo.commit(&mut stale).unwrap_err();

        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert_eq!(stale.uncommitted_events().len(), 1);
        assert_eq!(store.load_stream(id).unwrap().len(), 2);
    }

    #[test]
    fn gapped_stream_is_reported_as_corrupt() {
        let id = AggregateId::new();
        let stored = StoredEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: id,
            aggregate_type: "profiles.profile".to_string(),
            sequence_number: 2,
            event_type: ProfileEvent::CREATED.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        };

        let err = validate_loaded_stream(id, &[stored]).unwrap_err();
        assert!(matches!(err, DispatchError::CorruptStream(_)));
    }
}
