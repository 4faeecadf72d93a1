//! Identity-verification profile domain (event-sourced).
//!
//! Business rules for the profile lifecycle, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod profile;

pub use profile::{
    ActivateAfterPassing, ActivateProfile, AddProfile, DeactivateProfile, DeactivationReason, IdvLevel,
    MintProfile, PendingReason, Profile, ProfileActivated, ProfileCommand, ProfileCreated, ProfileDeactivated,
    ProfileEvent, ProfileFraudRejected, ProfileFraudReviewPassed, ProfileFraudReviewPending,
    ProfileGpoVerificationCleared, ProfileGpoVerificationPending, ProfileHold, ProfileInPersonVerificationPassed,
    ProfileInPersonVerificationPending, ProfileMinted, ProfileRetired, ProfileSuperseded, RetireProfile,
    SupersedeProfile,
};
