use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use proofing_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, UncommittedEvents, UserId,
};
use proofing_events::{Command, CommandTarget, Event};

/// Identity-verification level a profile was minted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdvLevel {
    LegacyUnsupervised,
    LegacyInPerson,
    UnsupervisedWithSelfie,
    InPerson,
}

impl IdvLevel {
    /// Levels equivalent to a facial match.
    pub fn facial_match(self) -> bool {
        matches!(self, IdvLevel::UnsupervisedWithSelfie | IdvLevel::InPerson)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdvLevel::LegacyUnsupervised => "legacy_unsupervised",
            IdvLevel::LegacyInPerson => "legacy_in_person",
            IdvLevel::UnsupervisedWithSelfie => "unsupervised_with_selfie",
            IdvLevel::InPerson => "in_person",
        }
    }
}

/// Why a profile stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    PasswordReset,
    EncryptionError,
    VerificationCancelled,
}

impl DeactivationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DeactivationReason::PasswordReset => "password_reset",
            DeactivationReason::EncryptionError => "encryption_error",
            DeactivationReason::VerificationCancelled => "verification_cancelled",
        }
    }
}

impl core::fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verification hold that keeps a profile from being activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    GpoVerificationPending,
    /// Under fraud review, or rejected by it.
    FraudCheckPending,
    InPersonVerificationPending,
}

impl PendingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingReason::GpoVerificationPending => "gpo_verification_pending",
            PendingReason::FraudCheckPending => "fraud_check_pending",
            PendingReason::InPersonVerificationPending => "in_person_verification_pending",
        }
    }
}

impl core::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Profile (a user's verified identity record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    id: AggregateId,
    user_id: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    minted_at: Option<DateTime<Utc>>,
    idv_level: Option<IdvLevel>,
    active: bool,
    activated_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    deactivation_reason: Option<DeactivationReason>,
    gpo_verification_pending_at: Option<DateTime<Utc>>,
    fraud_review_pending_at: Option<DateTime<Utc>>,
    fraud_rejection_at: Option<DateTime<Utc>>,
    in_person_verification_pending_at: Option<DateTime<Utc>>,
    retired: bool,
    version: u64,
    changes: UncommittedEvents<ProfileEvent>,
}

impl Profile {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn minted_at(&self) -> Option<DateTime<Utc>> {
        self.minted_at
    }

    pub fn is_minted(&self) -> bool {
        self.minted_at.is_some()
    }

    pub fn idv_level(&self) -> Option<IdvLevel> {
        self.idv_level
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
    }

    pub fn deactivation_reason(&self) -> Option<DeactivationReason> {
        self.deactivation_reason
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn gpo_verification_pending_at(&self) -> Option<DateTime<Utc>> {
        self.gpo_verification_pending_at
    }

    pub fn fraud_review_pending_at(&self) -> Option<DateTime<Utc>> {
        self.fraud_review_pending_at
    }

    pub fn fraud_rejection_at(&self) -> Option<DateTime<Utc>> {
        self.fraud_rejection_at
    }

    pub fn in_person_verification_pending_at(&self) -> Option<DateTime<Utc>> {
        self.in_person_verification_pending_at
    }

    /// Holds currently blocking activation, in a stable order.
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

    /// Initial behavior: bring the profile into existence.
    pub fn add(&mut self, user_id: UserId, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_created() {
            return Err(DomainError::validation("profile already exists"));
        }

        self.record(ProfileEvent::ProfileCreated(ProfileCreated {
            profile_id: self.id,
            user_id,
            occurred_at,
        }));
        Ok(())
    }

    /// Record that identity proofing completed. A profile is minted at most once.
    pub fn mint(&mut self, minted_at: DateTime<Utc>, idv_level: IdvLevel) -> DomainResult<()> {
        self.ensure_live()?;
        if self.is_minted() {
            return Err(DomainError::validation("profile may only be minted once"));
        }

        self.record(ProfileEvent::ProfileMinted(ProfileMinted {
            profile_id: self.id,
            minted_at,
            idv_level,
        }));
        Ok(())
    }

    pub fn activate(&mut self, activated_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if !self.is_minted() {
            return Err(DomainError::validation("profile must be minted before activation"));
        }
        if self.active {
            return Err(DomainError::validation("profile is already active"));
        }
        let pending = self.pending_reasons();
        if !pending.is_empty() {
            let pending: Vec<&str> = pending.into_iter().map(PendingReason::as_str).collect();
            return Err(DomainError::validation(format!(
                "cannot activate profile with pending reasons: {}",
                pending.join(", ")
            )));
        }
        let reactivating_after_reset = match self.deactivation_reason {
            None => false,
            Some(DeactivationReason::PasswordReset) => true,
            Some(reason) => {
                return Err(DomainError::validation(format!(
                    "cannot activate profile with deactivation reason: {reason}"
                )));
            }
        };

        // A password-reset reactivation never (re)verifies.
        let verified_at = if reactivating_after_reset || self.verified_at.is_some() {
            None
        } else {
            Some(activated_at)
        };

        self.record(ProfileEvent::ProfileActivated(ProfileActivated {
            profile_id: self.id,
            activated_at,
            verified_at,
        }));
        Ok(())
    }

    pub fn deactivate(&mut self, reason: DeactivationReason, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if !self.active && self.deactivation_reason == Some(reason) {
            return Err(DomainError::validation(format!(
                "profile is already deactivated: {reason}"
            )));
        }

        self.record(ProfileEvent::ProfileDeactivated(ProfileDeactivated {
            profile_id: self.id,
            reason,
            occurred_at,
        }));
        Ok(())
    }

    pub fn deactivate_for_gpo_verification(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.gpo_verification_pending_at.is_some() {
            return Err(DomainError::validation("profile is already pending gpo verification"));
        }

        self.record(ProfileEvent::ProfileGpoVerificationPending(ProfileGpoVerificationPending {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    /// The letter was confirmed; activation still needs its own command.
    pub fn remove_gpo_verification_hold(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.gpo_verification_pending_at.is_none() {
            return Err(DomainError::validation("profile is not pending gpo verification"));
        }

        self.record(ProfileEvent::ProfileGpoVerificationCleared(ProfileGpoVerificationCleared {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    /// Starting a review discards an earlier rejection and any in-person hold.
    pub fn deactivate_for_fraud_review(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.fraud_review_pending_at.is_some() {
            return Err(DomainError::validation("profile is already pending fraud review"));
        }

        self.record(ProfileEvent::ProfileFraudReviewPending(ProfileFraudReviewPending {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    pub fn reject_for_fraud(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.fraud_rejection_at.is_some() {
            return Err(DomainError::validation("profile was already rejected for fraud"));
        }

        self.record(ProfileEvent::ProfileFraudRejected(ProfileFraudRejected {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    pub fn deactivate_for_in_person_verification(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.in_person_verification_pending_at.is_some() {
            return Err(DomainError::validation("profile is already pending in-person verification"));
        }

        self.record(ProfileEvent::ProfileInPersonVerificationPending(ProfileInPersonVerificationPending {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    /// Clear the fraud hold and activate, atomically: either both events are
    /// recorded or neither.
    pub fn activate_after_passing_review(&mut self, activated_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.fraud_review_pending_at.is_none() && self.fraud_rejection_at.is_none() {
            return Err(DomainError::validation("profile has no fraud review to pass"));
        }

        let mut next = self.clone();
        next.record(ProfileEvent::ProfileFraudReviewPassed(ProfileFraudReviewPassed {
            profile_id: self.id,
            occurred_at: activated_at,
        }));
        next.activate(activated_at)?;
        *self = next;
        Ok(())
    }

    pub fn activate_after_passing_in_person(&mut self, activated_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.in_person_verification_pending_at.is_none() {
            return Err(DomainError::validation("profile is not pending in-person verification"));
        }

        let mut next = self.clone();
        next.record(ProfileEvent::ProfileInPersonVerificationPassed(ProfileInPersonVerificationPassed {
            profile_id: self.id,
            occurred_at: activated_at,
        }));
        next.activate(activated_at)?;
        *self = next;
        Ok(())
    }

    /// Another profile of the same user became active; this one steps down
    /// without a deactivation reason.
    pub fn supersede(&mut self, superseded_by: AggregateId, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if !self.active {
            return Err(DomainError::validation("profile is not active"));
        }
        if superseded_by == self.id {
            return Err(DomainError::invariant("a profile cannot supersede itself"));
        }

        self.record(ProfileEvent::ProfileSuperseded(ProfileSuperseded {
            profile_id: self.id,
            superseded_by,
            occurred_at,
        }));
        Ok(())
    }

    /// Terminal transition; the profile's read model row is removed.
    pub fn retire(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_live()?;
        if self.active {
            return Err(DomainError::validation("deactivate the profile before retiring it"));
        }

        self.record(ProfileEvent::ProfileRetired(ProfileRetired {
            profile_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    fn ensure_live(&self) -> DomainResult<()> {
        if !self.is_created() {
            return Err(DomainError::not_found());
        }
        if self.retired {
            return Err(DomainError::validation("profile is retired"));
        }
        Ok(())
    }

    fn ensure_profile_id(&self, profile_id: AggregateId) -> DomainResult<()> {
        if self.id != profile_id {
            return Err(DomainError::invariant("profile_id mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for Profile {
    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddProfile (creation; `profile_id: None` lets the handler allocate one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddProfile {
    pub profile_id: Option<AggregateId>,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MintProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintProfile {
    pub profile_id: AggregateId,
    pub minted_at: DateTime<Utc>,
    pub idv_level: IdvLevel,
}

/// Command: ActivateProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProfile {
    pub profile_id: AggregateId,
    pub activated_at: DateTime<Utc>,
}

/// Command: DeactivateProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateProfile {
    pub profile_id: AggregateId,
    pub reason: DeactivationReason,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireProfile {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: place a verification hold (gpo, fraud review, fraud rejection,
/// in-person) or lift the gpo hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileHold {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: clear a passed hold and activate in one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateAfterPassing {
    pub profile_id: AggregateId,
    pub activated_at: DateTime<Utc>,
}

/// Command: SupersedeProfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersedeProfile {
    pub profile_id: AggregateId,
    pub superseded_by: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileCommand {
    AddProfile(AddProfile),
    MintProfile(MintProfile),
    ActivateProfile(ActivateProfile),
    DeactivateProfile(DeactivateProfile),
    RetireProfile(RetireProfile),
    DeactivateForGpoVerification(ProfileHold),
    RemoveGpoVerificationHold(ProfileHold),
    DeactivateForFraudReview(ProfileHold),
    RejectForFraud(ProfileHold),
    DeactivateForInPersonVerification(ProfileHold),
    ActivateAfterPassingReview(ActivateAfterPassing),
    ActivateAfterPassingInPerson(ActivateAfterPassing),
    SupersedeProfile(SupersedeProfile),
}

impl Command for ProfileCommand {
    type Aggregate = Profile;

    fn target(&self) -> CommandTarget {
        match self {
            ProfileCommand::AddProfile(c) => CommandTarget::Create(c.profile_id),
            ProfileCommand::MintProfile(c) => CommandTarget::Existing(c.profile_id),
            ProfileCommand::ActivateProfile(c) => CommandTarget::Existing(c.profile_id),
            ProfileCommand::DeactivateProfile(c) => CommandTarget::Existing(c.profile_id),
            ProfileCommand::RetireProfile(c) => CommandTarget::Existing(c.profile_id),
            ProfileCommand::DeactivateForGpoVerification(c)
            | ProfileCommand::RemoveGpoVerificationHold(c)
            | ProfileCommand::DeactivateForFraudReview(c)
            | ProfileCommand::RejectForFraud(c)
            | ProfileCommand::DeactivateForInPersonVerification(c) => CommandTarget::Existing(c.profile_id),
            ProfileCommand::ActivateAfterPassingReview(c) | ProfileCommand::ActivateAfterPassingInPerson(c) => {
                CommandTarget::Existing(c.profile_id)
            }
            ProfileCommand::SupersedeProfile(c) => CommandTarget::Existing(c.profile_id),
        }
    }
}

/// Event: ProfileCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCreated {
    pub profile_id: AggregateId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileMinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMinted {
    pub profile_id: AggregateId,
    pub minted_at: DateTime<Utc>,
    pub idv_level: IdvLevel,
}

/// Event: ProfileActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileActivated {
    pub profile_id: AggregateId,
    pub activated_at: DateTime<Utc>,
    /// Set only on the activation that first verifies the profile.
    pub verified_at: Option<DateTime<Utc>>,
}

/// Event: ProfileDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDeactivated {
    pub profile_id: AggregateId,
    pub reason: DeactivationReason,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRetired {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileGpoVerificationPending (deactivates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileGpoVerificationPending {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileGpoVerificationCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileGpoVerificationCleared {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileFraudReviewPending (deactivates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFraudReviewPending {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileFraudReviewPassed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFraudReviewPassed {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileFraudRejected (deactivates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFraudRejected {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileInPersonVerificationPending (deactivates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInPersonVerificationPending {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileInPersonVerificationPassed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInPersonVerificationPassed {
    pub profile_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfileSuperseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSuperseded {
    pub profile_id: AggregateId,
    /// The profile whose activation displaced this one.
    pub superseded_by: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileEvent {
    ProfileCreated(ProfileCreated),
    ProfileMinted(ProfileMinted),
    ProfileActivated(ProfileActivated),
    ProfileDeactivated(ProfileDeactivated),
    ProfileRetired(ProfileRetired),
    ProfileGpoVerificationPending(ProfileGpoVerificationPending),
    ProfileGpoVerificationCleared(ProfileGpoVerificationCleared),
    ProfileFraudReviewPending(ProfileFraudReviewPending),
    ProfileFraudReviewPassed(ProfileFraudReviewPassed),
    ProfileFraudRejected(ProfileFraudRejected),
    ProfileInPersonVerificationPending(ProfileInPersonVerificationPending),
    ProfileInPersonVerificationPassed(ProfileInPersonVerificationPassed),
    ProfileSuperseded(ProfileSuperseded),
}

impl ProfileEvent {
    pub const CREATED: &'static str = "profiles.profile.created";
    pub const MINTED: &'static str = "profiles.profile.minted";
    pub const ACTIVATED: &'static str = "profiles.profile.activated";
    pub const DEACTIVATED: &'static str = "profiles.profile.deactivated";
    pub const RETIRED: &'static str = "profiles.profile.retired";
    pub const GPO_VERIFICATION_PENDING: &'static str = "profiles.profile.gpo_verification_pending";
    pub const GPO_VERIFICATION_CLEARED: &'static str = "profiles.profile.gpo_verification_cleared";
    pub const FRAUD_REVIEW_PENDING: &'static str = "profiles.profile.fraud_review_pending";
    pub const FRAUD_REVIEW_PASSED: &'static str = "profiles.profile.fraud_review_passed";
    pub const FRAUD_REJECTED: &'static str = "profiles.profile.fraud_rejected";
    pub const IN_PERSON_VERIFICATION_PENDING: &'static str = "profiles.profile.in_person_verification_pending";
    pub const IN_PERSON_VERIFICATION_PASSED: &'static str = "profiles.profile.in_person_verification_passed";
    pub const SUPERSEDED: &'static str = "profiles.profile.superseded";
}

impl Event for ProfileEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProfileEvent::ProfileCreated(_) => Self::CREATED,
            ProfileEvent::ProfileMinted(_) => Self::MINTED,
            ProfileEvent::ProfileActivated(_) => Self::ACTIVATED,
            ProfileEvent::ProfileDeactivated(_) => Self::DEACTIVATED,
            ProfileEvent::ProfileRetired(_) => Self::RETIRED,
            ProfileEvent::ProfileGpoVerificationPending(_) => Self::GPO_VERIFICATION_PENDING,
            ProfileEvent::ProfileGpoVerificationCleared(_) => Self::GPO_VERIFICATION_CLEARED,
            ProfileEvent::ProfileFraudReviewPending(_) => Self::FRAUD_REVIEW_PENDING,
            ProfileEvent::ProfileFraudReviewPassed(_) => Self::FRAUD_REVIEW_PASSED,
            ProfileEvent::ProfileFraudRejected(_) => Self::FRAUD_REJECTED,
            ProfileEvent::ProfileInPersonVerificationPending(_) => Self::IN_PERSON_VERIFICATION_PENDING,
            ProfileEvent::ProfileInPersonVerificationPassed(_) => Self::IN_PERSON_VERIFICATION_PASSED,
            ProfileEvent::ProfileSuperseded(_) => Self::SUPERSEDED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn aggregate_id(&self) -> AggregateId {
        match self {
            ProfileEvent::ProfileCreated(e) => e.profile_id,
            ProfileEvent::ProfileMinted(e) => e.profile_id,
            ProfileEvent::ProfileActivated(e) => e.profile_id,
            ProfileEvent::ProfileDeactivated(e) => e.profile_id,
            ProfileEvent::ProfileRetired(e) => e.profile_id,
            ProfileEvent::ProfileGpoVerificationPending(e) => e.profile_id,
            ProfileEvent::ProfileGpoVerificationCleared(e) => e.profile_id,
            ProfileEvent::ProfileFraudReviewPending(e) => e.profile_id,
            ProfileEvent::ProfileFraudReviewPassed(e) => e.profile_id,
            ProfileEvent::ProfileFraudRejected(e) => e.profile_id,
            ProfileEvent::ProfileInPersonVerificationPending(e) => e.profile_id,
            ProfileEvent::ProfileInPersonVerificationPassed(e) => e.profile_id,
            ProfileEvent::ProfileSuperseded(e) => e.profile_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProfileEvent::ProfileCreated(e) => e.occurred_at,
            ProfileEvent::ProfileMinted(e) => e.minted_at,
            ProfileEvent::ProfileActivated(e) => e.activated_at,
            ProfileEvent::ProfileDeactivated(e) => e.occurred_at,
            ProfileEvent::ProfileRetired(e) => e.occurred_at,
            ProfileEvent::ProfileGpoVerificationPending(e) => e.occurred_at,
            ProfileEvent::ProfileGpoVerificationCleared(e) => e.occurred_at,
            ProfileEvent::ProfileFraudReviewPending(e) => e.occurred_at,
            ProfileEvent::ProfileFraudReviewPassed(e) => e.occurred_at,
            ProfileEvent::ProfileFraudRejected(e) => e.occurred_at,
            ProfileEvent::ProfileInPersonVerificationPending(e) => e.occurred_at,
            ProfileEvent::ProfileInPersonVerificationPassed(e) => e.occurred_at,
            ProfileEvent::ProfileSuperseded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Profile {
    type Command = ProfileCommand;
    type Event = ProfileEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "profiles.profile";

    fn new(id: AggregateId) -> Self {
        Self {
            id,
            user_id: None,
            created_at: None,
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
            retired: false,
            version: 0,
            changes: UncommittedEvents::new(),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProfileEvent::ProfileCreated(e) => {
                self.id = e.profile_id;
                self.user_id = Some(e.user_id);
                self.created_at = Some(e.occurred_at);
            }
            ProfileEvent::ProfileMinted(e) => {
                self.minted_at = Some(e.minted_at);
                self.idv_level = Some(e.idv_level);
            }
            ProfileEvent::ProfileActivated(e) => {
                self.active = true;
                self.activated_at = Some(e.activated_at);
                self.deactivation_reason = None;
                if e.verified_at.is_some() {
                    self.verified_at = e.verified_at;
                }
            }
            ProfileEvent::ProfileDeactivated(e) => {
                self.active = false;
                self.deactivation_reason = Some(e.reason);
            }
            ProfileEvent::ProfileRetired(_) => {
                self.active = false;
                self.retired = true;
            }
            ProfileEvent::ProfileGpoVerificationPending(e) => {
                self.active = false;
                self.gpo_verification_pending_at = Some(e.occurred_at);
            }
            ProfileEvent::ProfileGpoVerificationCleared(_) => {
                self.gpo_verification_pending_at = None;
            }
            ProfileEvent::ProfileFraudReviewPending(e) => {
                self.active = false;
                self.fraud_review_pending_at = Some(e.occurred_at);
                self.fraud_rejection_at = None;
                self.in_person_verification_pending_at = None;
            }
            ProfileEvent::ProfileFraudReviewPassed(_) => {
                self.fraud_review_pending_at = None;
                self.fraud_rejection_at = None;
            }
            ProfileEvent::ProfileFraudRejected(e) => {
                self.active = false;
                self.fraud_review_pending_at = None;
                self.fraud_rejection_at = Some(e.occurred_at);
                self.in_person_verification_pending_at = None;
            }
            ProfileEvent::ProfileInPersonVerificationPending(e) => {
                self.active = false;
                self.in_person_verification_pending_at = Some(e.occurred_at);
            }
            ProfileEvent::ProfileInPersonVerificationPassed(_) => {
                self.in_person_verification_pending_at = None;
            }
            ProfileEvent::ProfileSuperseded(_) => {
                self.active = false;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&mut self, command: &Self::Command) -> Result<(), Self::Error> {
        match command {
            ProfileCommand::AddProfile(cmd) => {
                if let Some(profile_id) = cmd.profile_id {
                    self.ensure_profile_id(profile_id)?;
                }
                self.add(cmd.user_id, cmd.occurred_at)
            }
            ProfileCommand::MintProfile(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.mint(cmd.minted_at, cmd.idv_level)
            }
            ProfileCommand::ActivateProfile(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.activate(cmd.activated_at)
            }
            ProfileCommand::DeactivateProfile(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.deactivate(cmd.reason, cmd.occurred_at)
            }
            ProfileCommand::RetireProfile(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.retire(cmd.occurred_at)
            }
            ProfileCommand::DeactivateForGpoVerification(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.deactivate_for_gpo_verification(cmd.occurred_at)
            }
            ProfileCommand::RemoveGpoVerificationHold(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.remove_gpo_verification_hold(cmd.occurred_at)
            }
            ProfileCommand::DeactivateForFraudReview(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.deactivate_for_fraud_review(cmd.occurred_at)
            }
            ProfileCommand::RejectForFraud(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.reject_for_fraud(cmd.occurred_at)
            }
            ProfileCommand::DeactivateForInPersonVerification(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.deactivate_for_in_person_verification(cmd.occurred_at)
            }
            ProfileCommand::ActivateAfterPassingReview(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.activate_after_passing_review(cmd.activated_at)
            }
            ProfileCommand::ActivateAfterPassingInPerson(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.activate_after_passing_in_person(cmd.activated_at)
            }
            ProfileCommand::SupersedeProfile(cmd) => {
                self.ensure_profile_id(cmd.profile_id)?;
                self.supersede(cmd.superseded_by, cmd.occurred_at)
            }
        }
    }

    fn uncommitted(&self) -> &UncommittedEvents<ProfileEvent> {
        &self.changes
    }

    fn uncommitted_mut(&mut self) -> &mut UncommittedEvents<ProfileEvent> {
        &mut self.changes
    }
}
