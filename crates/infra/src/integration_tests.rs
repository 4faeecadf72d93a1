//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → Repository → EventStore → ProjectorRegistry → ReadModel
//!
//! Verifies:
//! - Commands produce events that update read models correctly
//! - Optimistic concurrency conflicts are detected and retried
//! - Projection failures never roll back commits and are reprocessed
//! - Out-of-order and repeated delivery against a failing store still converges
//! - Verification holds and the one-active-profile-per-user rule hold end to end
//! - Rebuilds converge to the incrementally built read model

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use proofing_core::{Aggregate, AggregateId, AggregateRoot, ExpectedVersion, UserId};
use proofing_events::{InMemoryCursorStore, ProjectionError, ProjectionRunner};
use proofing_profiles::{
    ActivateAfterPassing, ActivateProfile, AddProfile, DeactivateProfile, DeactivationReason, IdvLevel,
    MintProfile, PendingReason, Profile, ProfileCommand, ProfileDeactivated, ProfileEvent, ProfileHold,
    RetireProfile,
};

use crate::command_handler::{CommandHandler, DispatchError};
use crate::config::{EngineConfig, ProjectionDispatchMode, RetryConfig};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
use crate::projections::{ProfileProjection, ProfileReadModel, ProjectorRegistry};
use crate::read_model::{InMemoryReadModelStore, ReadModelStore};
use crate::repository::Repository;
use crate::ProfileEngine;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig::immediate(3),
        ..EngineConfig::default()
    }
}

fn add(profile_id: Option<AggregateId>) -> ProfileCommand {
    ProfileCommand::AddProfile(AddProfile {
        profile_id,
        user_id: UserId::new(),
        occurred_at: at(0),
    })
}

fn mint(profile_id: AggregateId, minted_at: DateTime<Utc>) -> ProfileCommand {
    ProfileCommand::MintProfile(MintProfile {
        profile_id,
        minted_at,
        idv_level: IdvLevel::UnsupervisedWithSelfie,
    })
}

fn activate(profile_id: AggregateId, activated_at: DateTime<Utc>) -> ProfileCommand {
    ProfileCommand::ActivateProfile(ActivateProfile { profile_id, activated_at })
}

fn deactivate(profile_id: AggregateId, reason: DeactivationReason) -> ProfileCommand {
    ProfileCommand::DeactivateProfile(DeactivateProfile {
        profile_id,
        reason,
        occurred_at: at(50),
    })
}

fn event_types(store: &dyn EventStore, id: AggregateId) -> Vec<String> {
    store
        .load_stream(id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[test]
fn add_then_mint_then_mint_again() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let p1 = AggregateId::new();

    let created = engine.handle(add(Some(p1))).unwrap();
    assert_eq!(created.aggregate_id, p1);
    assert_eq!(created.version, 1);
    assert_eq!(created.committed[0].event_type, ProfileEvent::CREATED);
    let row = engine.profile(p1).unwrap().unwrap();
    assert_eq!(row.profile_id, p1);
    assert_eq!(row.minted_at, None);

    let minted = engine.handle(mint(p1, at(10))).unwrap();
    assert_eq!(minted.version, 2);
    assert_eq!(minted.committed[0].sequence_number, 2);
    let row = engine.profile(p1).unwrap().unwrap();
    assert_eq!(row.minted_at, Some(at(10)));
    assert_eq!(row.idv_level, Some(IdvLevel::UnsupervisedWithSelfie));

    let err = engine.handle(mint(p1, at(20))).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(
        event_types(engine.store().as_ref(), p1),
        vec![ProfileEvent::CREATED, ProfileEvent::MINTED]
    );
    assert_eq!(engine.profile(p1).unwrap().unwrap().minted_at, Some(at(10)));
}

#[test]
fn creation_without_id_allocates_one() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();

    let outcome = engine.handle(add(None)).unwrap();
    let follow_up = engine.handle(mint(outcome.aggregate_id, at(1))).unwrap();

    assert_eq!(follow_up.version, 2);
    assert_eq!(engine.profiles().unwrap().len(), 1);
}

#[test]
fn creating_an_existing_profile_fails_without_retrying() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let id = AggregateId::new();
    engine.handle(add(Some(id))).unwrap();

    let err = engine.handle(add(Some(id))).unwrap_err();

    assert!(matches!(err, DispatchError::AlreadyExists(found) if found == id));
    assert_eq!(engine.store().load_stream(id).unwrap().len(), 1);
}

#[test]
fn mutation_of_unknown_profile_is_not_found() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let id = AggregateId::new();

    let err = engine.handle(mint(id, at(1))).unwrap_err();

    assert!(matches!(err, DispatchError::NotFound(found) if found == id));
    assert!(engine.store().load_all().unwrap().is_empty());
}

#[test]
fn full_lifecycle_is_reflected_in_the_read_model() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let id = engine.handle(add(None)).unwrap().aggregate_id;

    engine.handle(mint(id, at(10))).unwrap();
    engine.handle(activate(id, at(20))).unwrap();
    let row = engine.profile(id).unwrap().unwrap();
    assert!(row.active);
    assert_eq!(row.verified_at, Some(at(20)));

    engine.handle(deactivate(id, DeactivationReason::PasswordReset)).unwrap();
    engine.handle(activate(id, at(60))).unwrap();
    let row = engine.profile(id).unwrap().unwrap();
    assert_eq!(row.activated_at, Some(at(60)));
    assert_eq!(row.verified_at, Some(at(20)));

    engine.handle(deactivate(id, DeactivationReason::VerificationCancelled)).unwrap();
    let outcome = engine
        .handle(ProfileCommand::RetireProfile(RetireProfile { profile_id: id, occurred_at: at(90) }))
        .unwrap();

    assert_eq!(outcome.version, 7);
    assert_eq!(engine.profile(id).unwrap(), None);
    assert!(matches!(
        engine.handle(activate(id, at(99))),
        Err(DispatchError::Validation(_))
    ));
}

#[test]
fn racing_commits_from_the_same_version_exactly_one_wins() {
    let store = Arc::new(InMemoryEventStore::new());
    let handler = CommandHandler::new(store.clone(), RetryConfig::immediate(1));
    let id = handler.handle(add(None)).unwrap().aggregate_id;

    let barrier = Arc::new(Barrier::new(2));
    let results: Vec<Result<Vec<StoredEvent>, DispatchError>> = [IdvLevel::InPerson, IdvLevel::LegacyInPerson]
        .into_iter()
        .map(|level| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || -> Result<Vec<StoredEvent>, DispatchError> {
                let repo = Repository::new(store);
                let mut profile: Profile = repo.load(id)?;
                profile
                    .mint(at(5), level)
                    .map_err(|e| DispatchError::from_domain(id, e))?;
                barrier.wait();
                repo.commit(&mut profile)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::Concurrency(_))))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(store.load_stream(id).unwrap().len(), 2);
}

/// Lets a competing writer sneak in an event right before the first append.
struct RacingStore {
    inner: InMemoryEventStore,
    competing: std::sync::Mutex<Option<ProfileEvent>>,
    appends: AtomicU32,
}

impl EventStore for RacingStore {
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if let Some(event) = self.competing.lock().unwrap().take() {
            let competing = UncommittedEvent::from_typed(aggregate_id, Profile::AGGREGATE_TYPE, Uuid::now_v7(), &event)?;
            self.inner.append(aggregate_id, expected_version, vec![competing])?;
        }
        self.inner.append(aggregate_id, expected_version, events)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_all()
    }
}

#[test]
fn concurrency_conflict_is_retried_against_fresh_state() {
    let store = Arc::new(RacingStore {
        inner: InMemoryEventStore::new(),
        competing: std::sync::Mutex::new(None),
        appends: AtomicU32::new(0),
    });
    let handler = CommandHandler::new(store.clone(), RetryConfig::immediate(3));
    let id = handler.handle(add(None)).unwrap().aggregate_id;
    handler.handle(mint(id, at(10))).unwrap();
    handler.handle(activate(id, at(20))).unwrap();

    *store.competing.lock().unwrap() = Some(ProfileEvent::ProfileDeactivated(ProfileDeactivated {
        profile_id: id,
        reason: DeactivationReason::PasswordReset,
        occurred_at: at(30),
    }));
    store.appends.store(0, Ordering::SeqCst);

    let outcome = handler.handle(deactivate(id, DeactivationReason::EncryptionError)).unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.version, 5);
    assert_eq!(store.appends.load(Ordering::SeqCst), 2);
    let profile: Profile = handler.repository().load(id).unwrap();
    assert_eq!(profile.deactivation_reason(), Some(DeactivationReason::EncryptionError));
}

/// Every append loses the race.
struct AlwaysConflicting {
    inner: InMemoryEventStore,
    attempts: AtomicU32,
}

impl EventStore for AlwaysConflicting {
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if self.inner.load_stream(aggregate_id)?.is_empty() {
            return self.inner.append(aggregate_id, expected_version, events);
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EventStoreError::Concurrency("simulated".to_string()))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_all()
    }
}

#[test]
fn exhausted_retries_surface_a_terminal_conflict() {
    let store = Arc::new(AlwaysConflicting {
        inner: InMemoryEventStore::new(),
        attempts: AtomicU32::new(0),
    });
    let handler = CommandHandler::new(store.clone(), RetryConfig::immediate(4));
    let id = handler.handle(add(None)).unwrap().aggregate_id;

    let err = handler.handle(mint(id, at(1))).unwrap_err();

    assert!(matches!(err, DispatchError::Conflict { aggregate_id, attempts: 4 } if aggregate_id == id));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(store.load_stream(id).unwrap().len(), 1);
}

/// Read model store whose writes fail while `failing` is set, and whose
/// writes of active rows fail while `rejects_active` is set.
#[derive(Default)]
struct FlakyProfileStore {
    inner: InMemoryReadModelStore<AggregateId, ProfileReadModel>,
    failing: AtomicBool,
    rejects_active: AtomicBool,
}

impl FlakyProfileStore {
    fn check(&self) -> Result<(), ProjectionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProjectionError::store("database unavailable"));
        }
        Ok(())
    }
}

impl ReadModelStore<AggregateId, ProfileReadModel> for FlakyProfileStore {
    fn get(&self, key: &AggregateId) -> Result<Option<ProfileReadModel>, ProjectionError> {
        self.inner.get(key)
    }

    fn upsert(&self, key: AggregateId, value: ProfileReadModel) -> Result<(), ProjectionError> {
        self.check()?;
        if value.active && self.rejects_active.load(Ordering::SeqCst) {
            return Err(ProjectionError::store("constraint violated"));
        }
        self.inner.upsert(key, value)
    }

    fn remove(&self, key: &AggregateId) -> Result<bool, ProjectionError> {
        self.check()?;
        self.inner.remove(key)
    }

    fn list(&self) -> Result<Vec<ProfileReadModel>, ProjectionError> {
        self.inner.list()
    }

    fn clear(&self) -> Result<(), ProjectionError> {
        self.check()?;
        self.inner.clear()
    }
}

#[test]
fn projection_failures_are_queued_and_never_roll_back_commits() {
    let profiles = Arc::new(FlakyProfileStore::default());
    let engine = ProfileEngine::assemble(
        &test_config(),
        Arc::new(InMemoryEventStore::new()),
        profiles.clone(),
        Arc::new(InMemoryCursorStore::new()),
    )
    .unwrap();
    let id = engine.handle(add(None)).unwrap().aggregate_id;

    profiles.failing.store(true, Ordering::SeqCst);
    let minted = engine.handle(mint(id, at(10))).unwrap();
    let activated = engine.handle(activate(id, at(20))).unwrap();

    assert_eq!((minted.version, activated.version), (2, 3));
    assert_eq!(engine.store().load_stream(id).unwrap().len(), 3);
    assert_eq!(engine.registry().failed_count(), 1);
    assert_eq!(engine.profile(id).unwrap().unwrap().minted_at, None);

    profiles.failing.store(false, Ordering::SeqCst);
    assert_eq!(engine.registry().retry_failed(), 1);

    let row = engine.profile(id).unwrap().unwrap();
    assert_eq!(row.minted_at, Some(at(10)));
    assert!(row.active);
    assert_eq!(engine.registry().failed_count(), 0);
}

#[test]
fn reordered_and_repeated_delivery_against_a_failing_store_converges() {
    let store = Arc::new(InMemoryEventStore::new());
    let handler = CommandHandler::new(store.clone(), RetryConfig::immediate(1));
    let id = handler.handle(add(None)).unwrap().aggregate_id;
    handler.handle(mint(id, at(10))).unwrap();
    handler.handle(activate(id, at(20))).unwrap();
    handler.handle(deactivate(id, DeactivationReason::EncryptionError)).unwrap();
    let log: Vec<_> = store.load_stream(id).unwrap().iter().map(StoredEvent::to_envelope).collect();

    let profiles = Arc::new(FlakyProfileStore::default());
    let registry = ProjectorRegistry::new().with_projector(ProjectionRunner::new(ProfileProjection::new(profiles.clone())));
    profiles.rejects_active.store(true, Ordering::SeqCst);

    registry.dispatch(&log[0]);
    registry.dispatch(&log[2]);
    assert_eq!(registry.failed_count(), 0);

    // Filling the gap applies seq 2; the parked activation then fails and is queued.
    registry.dispatch(&log[1]);
    let failures = registry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].envelope.sequence_number(), 3);
    assert_eq!(failures[0].attempts, 1);

    // The successor parks behind the failed activation; a redelivery of the
    // activation fails again without queueing it twice.
    registry.dispatch(&log[3]);
    registry.dispatch(&log[2]);
    let failures = registry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 2);

    registry.catch_up(store.as_ref()).unwrap();
    assert_eq!(registry.failed_count(), 1);
    assert_eq!(registry.failures()[0].attempts, 3);

    let row = profiles.get(&id).unwrap().unwrap();
    assert_eq!(row.minted_at, Some(at(10)));
    assert_eq!(row.activated_at, None);

    profiles.rejects_active.store(false, Ordering::SeqCst);
    assert_eq!(registry.retry_failed(), 1);
    assert_eq!(registry.failed_count(), 0);

    let row = profiles.get(&id).unwrap().unwrap();
    assert_eq!(row.activated_at, Some(at(20)));
    assert_eq!(row.verified_at, Some(at(20)));
    assert!(!row.active);
    assert_eq!(row.deactivation_reason, Some(DeactivationReason::EncryptionError));

    // Everything is applied; another pass over the log changes nothing.
    let updates = registry.subscribe_updates();
    registry.catch_up(store.as_ref()).unwrap();
    assert!(updates.drain().is_empty());
}

#[test]
fn verification_holds_gate_activation_end_to_end() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let id = engine.handle(add(None)).unwrap().aggregate_id;
    engine.handle(mint(id, at(10))).unwrap();
    engine
        .handle(ProfileCommand::DeactivateForFraudReview(ProfileHold { profile_id: id, occurred_at: at(12) }))
        .unwrap();

    let row = engine.profile(id).unwrap().unwrap();
    assert_eq!(row.fraud_review_pending_at, Some(at(12)));
    assert_eq!(row.pending_reasons(), vec![PendingReason::FraudCheckPending]);

    let err = engine.handle(activate(id, at(20))).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(ref msg) if msg.contains("fraud_check_pending")));

    let outcome = engine
        .handle(ProfileCommand::ActivateAfterPassingReview(ActivateAfterPassing { profile_id: id, activated_at: at(30) }))
        .unwrap();
    assert_eq!(outcome.version, 5);
    assert_eq!(outcome.committed.len(), 2);

    let row = engine.profile(id).unwrap().unwrap();
    assert!(row.active);
    assert!(row.pending_reasons().is_empty());
    assert_eq!(row.verified_at, Some(at(30)));
    assert_eq!(
        event_types(engine.store().as_ref(), id),
        vec![
            ProfileEvent::CREATED,
            ProfileEvent::MINTED,
            ProfileEvent::FRAUD_REVIEW_PENDING,
            ProfileEvent::FRAUD_REVIEW_PASSED,
            ProfileEvent::ACTIVATED,
        ]
    );
}

#[test]
fn activating_a_profile_supersedes_the_users_other_active_profile() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let user_id = UserId::new();
    let add_for_user = || {
        ProfileCommand::AddProfile(AddProfile {
            profile_id: None,
            user_id,
            occurred_at: at(0),
        })
    };

    let first = engine.handle(add_for_user()).unwrap().aggregate_id;
    engine.handle(mint(first, at(1))).unwrap();
    engine.handle(activate(first, at(2))).unwrap();

    let stranger = engine.handle(add(None)).unwrap().aggregate_id;
    engine.handle(mint(stranger, at(3))).unwrap();
    engine.handle(activate(stranger, at(4))).unwrap();

    let second = engine.handle(add_for_user()).unwrap().aggregate_id;
    engine.handle(mint(second, at(5))).unwrap();
    engine.handle(activate(second, at(6))).unwrap();

    let first_row = engine.profile(first).unwrap().unwrap();
    assert!(!first_row.active);
    assert_eq!(first_row.deactivation_reason, None);
    assert!(engine.profile(second).unwrap().unwrap().active);
    assert!(engine.profile(stranger).unwrap().unwrap().active);
    assert_eq!(event_types(engine.store().as_ref(), first).last().map(String::as_str), Some(ProfileEvent::SUPERSEDED));

    // Switching back supersedes the second profile in turn.
    engine.handle(activate(first, at(7))).unwrap();
    assert!(engine.profile(first).unwrap().unwrap().active);
    assert!(!engine.profile(second).unwrap().unwrap().active);
}

#[test]
fn projection_updates_are_signalled() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let updates = engine.registry().subscribe_updates();

    let id = engine.handle(add(None)).unwrap().aggregate_id;
    engine.handle(mint(id, at(10))).unwrap();

    let signals = updates.drain();
    let seqs: Vec<u64> = signals.iter().map(|u| u.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert!(signals.iter().all(|u| u.projection == ProfileProjection::NAME && u.aggregate_id == id));
}

#[test]
fn asynchronous_dispatch_converges() {
    let config = EngineConfig {
        projection_dispatch: ProjectionDispatchMode::Asynchronous,
        ..test_config()
    };
    let engine = ProfileEngine::in_memory(&config).unwrap();
    let updates = engine.registry().subscribe_updates();

    let id = engine.handle(add(None)).unwrap().aggregate_id;
    engine.handle(mint(id, at(10))).unwrap();

    for expected in 1..=2u64 {
        let update = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(update.sequence_number, expected);
    }
    assert_eq!(engine.profile(id).unwrap().unwrap().minted_at, Some(at(10)));
    engine.shutdown();
}

#[test]
fn catch_up_repairs_a_projection_that_missed_events() {
    let store = Arc::new(InMemoryEventStore::new());
    let handler = CommandHandler::new(store.clone(), RetryConfig::immediate(1));
    let a = handler.handle(add(None)).unwrap().aggregate_id;
    let b = handler.handle(add(None)).unwrap().aggregate_id;
    handler.handle(mint(a, at(3))).unwrap();

    let profiles = Arc::new(InMemoryReadModelStore::<AggregateId, ProfileReadModel>::new());
    let registry = ProjectorRegistry::new().with_projector(ProjectionRunner::new(ProfileProjection::new(profiles.clone())));

    assert_eq!(registry.catch_up(store.as_ref()).unwrap(), 3);
    assert_eq!(profiles.list().unwrap().len(), 2);
    assert_eq!(profiles.get(&a).unwrap().unwrap().minted_at, Some(at(3)));

    // Running it again is a no-op thanks to the cursors.
    let updates = registry.subscribe_updates();
    registry.catch_up(store.as_ref()).unwrap();
    assert!(updates.drain().is_empty());
    assert!(profiles.get(&b).unwrap().is_some());
}

#[test]
fn rebuild_matches_incremental_application() {
    let engine = ProfileEngine::in_memory(&test_config()).unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = engine.handle(add(None)).unwrap().aggregate_id;
        engine.handle(mint(id, at(i))).unwrap();
        if i % 2 == 0 {
            engine.handle(activate(id, at(100 + i))).unwrap();
        }
        ids.push(id);
    }
    engine.handle(deactivate(ids[0], DeactivationReason::EncryptionError)).unwrap();
    engine
        .handle(ProfileCommand::RetireProfile(RetireProfile { profile_id: ids[1], occurred_at: at(200) }))
        .unwrap();

    let incremental = engine.profiles().unwrap();
    assert_eq!(incremental.len(), 4);

    assert_eq!(engine.rebuild_projections().unwrap(), 15);
    assert_eq!(engine.profiles().unwrap(), incremental);

    engine.rebuild_projections().unwrap();
    assert_eq!(engine.profiles().unwrap(), incremental);
}

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn command_for(op: u8, id: AggregateId, t: i64) -> ProfileCommand {
        match op % 6 {
            0 => mint(id, at(t)),
            1 => activate(id, at(t)),
            2 => deactivate(id, DeactivationReason::PasswordReset),
            3 => deactivate(id, DeactivationReason::EncryptionError),
            4 => deactivate(id, DeactivationReason::VerificationCancelled),
            _ => ProfileCommand::RetireProfile(RetireProfile { profile_id: id, occurred_at: at(t) }),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: rebuilding from the log reproduces the incrementally maintained read model,
        /// and the repository's replay agrees with the stored stream length.
        #[test]
        fn rebuild_is_idempotent(ops in prop::collection::vec((0usize..3, 0u8..6), 0..30)) {
            let engine = ProfileEngine::in_memory(&test_config()).unwrap();
            let ids: Vec<AggregateId> = (0..3)
                .map(|_| engine.handle(add(None)).unwrap().aggregate_id)
                .collect();

            for (t, (which, op)) in ops.iter().enumerate() {
                let _ = engine.handle(command_for(*op, ids[*which], t as i64 + 1));
            }

            let incremental = engine.profiles().unwrap();
            engine.rebuild_projections().unwrap();
            prop_assert_eq!(&engine.profiles().unwrap(), &incremental);

            for id in &ids {
                let profile: Profile = Repository::new(engine.store()).load(*id).unwrap();
                prop_assert_eq!(profile.version(), engine.store().load_stream(*id).unwrap().len() as u64);
            }
        }
    }
}
