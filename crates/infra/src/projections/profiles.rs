use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use proofing_core::{AggregateId, UserId};
use proofing_events::{EventEnvelope, Projection, ProjectionError};
use proofing_profiles::{DeactivationReason, IdvLevel, PendingReason, ProfileEvent};

use crate::read_model::ReadModelStore;

/// Queryable profile read model: one row per live (non-retired) profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileReadModel {
    pub profile_id: AggregateId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub minted_at: Option<DateTime<Utc>>,
    pub idv_level: Option<IdvLevel>,
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<DeactivationReason>,
    pub gpo_verification_pending_at: Option<DateTime<Utc>>,
    pub fraud_review_pending_at: Option<DateTime<Utc>>,
    pub fraud_rejection_at: Option<DateTime<Utc>>,
    pub in_person_verification_pending_at: Option<DateTime<Utc>>,
}

impl ProfileReadModel {
    pub fn is_facial_match(&self) -> bool {
        self.idv_level.is_some_and(IdvLevel::facial_match)
    }

    /// Same holds, same order, as `Profile::pending_reasons`.
    pub fn pending_reasons(&self) -> Vec<PendingReason> {
        let mut reasons = Vec::new();
        if self.gpo_verification_pending_at.is_some() {
            reasons.push(PendingReason::GpoVerificationPending);
        }
        if self.fraud_review_pending_at.is_some() || self.fraud_rejection_at.is_some() {
            reasons.push(PendingReason::FraudCheckPending);
        }
        if self.in_person_verification_pending_at.is_some() {
            reasons.push(PendingReason::InPersonVerificationPending);
        }
        reasons
    }
}

pub type ProfileStore = dyn ReadModelStore<AggregateId, ProfileReadModel>;

/// Profile projection.
///
/// Creation inserts a row, later events update only the fields they own and
/// retirement deletes the row. Ordering and deduplication are handled by the
/// [`ProjectionRunner`](proofing_events::ProjectionRunner) wrapping it.
pub struct ProfileProjection {
    store: Arc<ProfileStore>,
}

impl core::fmt::Debug for ProfileProjection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProfileProjection").finish_non_exhaustive()
    }
}

impl ProfileProjection {
    pub const NAME: &'static str = "profiles.profile_projection";

    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, profile_id: AggregateId) -> Result<Option<ProfileReadModel>, ProjectionError> {
        self.store.get(&profile_id)
    }

    pub fn list(&self) -> Result<Vec<ProfileReadModel>, ProjectionError> {
        self.store.list()
    }

    fn update(
        &self,
        profile_id: AggregateId,
        change: impl FnOnce(&mut ProfileReadModel),
    ) -> Result<(), ProjectionError> {
        let mut row = self
            .store
            .get(&profile_id)?
            .ok_or(ProjectionError::MissingRecord { aggregate_id: profile_id })?;
        change(&mut row);
        self.store.upsert(profile_id, row)
    }
}

impl Projection for ProfileProjection {
    type Ev = ProfileEvent;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handles(&self, event_type: &str) -> bool {
        matches!(
            event_type,
            ProfileEvent::CREATED
                | ProfileEvent::MINTED
                | ProfileEvent::ACTIVATED
                | ProfileEvent::DEACTIVATED
                | ProfileEvent::RETIRED
                | ProfileEvent::GPO_VERIFICATION_PENDING
                | ProfileEvent::GPO_VERIFICATION_CLEARED
                | ProfileEvent::FRAUD_REVIEW_PENDING
                | ProfileEvent::FRAUD_REVIEW_PASSED
                | ProfileEvent::FRAUD_REJECTED
                | ProfileEvent::IN_PERSON_VERIFICATION_PENDING
                | ProfileEvent::IN_PERSON_VERIFICATION_PASSED
                | ProfileEvent::SUPERSEDED
        )
    }

    fn apply(&mut self, envelope: &EventEnvelope<ProfileEvent>) -> Result<(), ProjectionError> {
        match envelope.payload() {
            ProfileEvent::ProfileCreated(e) => self.store.upsert(
                e.profile_id,
                ProfileReadModel {
                    profile_id: e.profile_id,
                    user_id: e.user_id,
                    created_at: e.occurred_at,
                    minted_at: None,
                    idv_level: None,
                    active: false,
                    activated_at: None,
                    verified_at: None,
                    deactivation_reason: None,
                    gpo_verification_pending_at: None,
                    fraud_review_pending_at: None,
                    fraud_rejection_at: None,
                    in_person_verification_pending_at: None,
                },
            ),
            ProfileEvent::ProfileMinted(e) => self.update(e.profile_id, |row| {
                row.minted_at = Some(e.minted_at);
                row.idv_level = Some(e.idv_level);
            }),
            ProfileEvent::ProfileActivated(e) => self.update(e.profile_id, |row| {
                row.active = true;
                row.activated_at = Some(e.activated_at);
                row.deactivation_reason = None;
                if e.verified_at.is_some() {
                    row.verified_at = e.verified_at;
                }
            }),
            ProfileEvent::ProfileDeactivated(e) => self.update(e.profile_id, |row| {
                row.active = false;
                row.deactivation_reason = Some(e.reason);
            }),
            ProfileEvent::ProfileRetired(e) => self.store.remove(&e.profile_id).map(|_| ()),
            ProfileEvent::ProfileGpoVerificationPending(e) => self.update(e.profile_id, |row| {
                row.active = false;
                row.gpo_verification_pending_at = Some(e.occurred_at);
            }),
            ProfileEvent::ProfileGpoVerificationCleared(e) => self.update(e.profile_id, |row| {
                row.gpo_verification_pending_at = None;
            }),
            ProfileEvent::ProfileFraudReviewPending(e) => self.update(e.profile_id, |row| {
                row.active = false;
                row.fraud_review_pending_at = Some(e.occurred_at);
                row.fraud_rejection_at = None;
                row.in_person_verification_pending_at = None;
            }),
            ProfileEvent::ProfileFraudReviewPassed(e) => self.update(e.profile_id, |row| {
                row.fraud_review_pending_at = None;
                row.fraud_rejection_at = None;
            }),
            ProfileEvent::ProfileFraudRejected(e) => self.update(e.profile_id, |row| {
                row.active = false;
                row.fraud_review_pending_at = None;
                row.fraud_rejection_at = Some(e.occurred_at);
                row.in_person_verification_pending_at = None;
            }),
            ProfileEvent::ProfileInPersonVerificationPending(e) => self.update(e.profile_id, |row| {
                row.active = false;
                row.in_person_verification_pending_at = Some(e.occurred_at);
            }),
            ProfileEvent::ProfileInPersonVerificationPassed(e) => self.update(e.profile_id, |row| {
                row.in_person_verification_pending_at = None;
            }),
            ProfileEvent::ProfileSuperseded(e) => self.update(e.profile_id, |row| {
                row.active = false;
            }),
        }
    }

    fn reset(&mut self) -> Result<(), ProjectionError> {
        self.store.clear()
    }
}
