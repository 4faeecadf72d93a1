//! Cross-profile policy: a user has at most one active profile.
//!
//! ```text
//! ProfileActivated (profile A, user U)
//!   ↓
//! read model: other rows of U that are still active
//!   ↓
//! SupersedeProfile for each of them
//! ```
//!
//! The policy only decides; [`ProfileEngine`](crate::ProfileEngine) runs the
//! commands it returns through the regular command handler.

use chrono::{DateTime, Utc};

use proofing_core::{AggregateId, UserId};
use proofing_profiles::{ProfileCommand, ProfileEvent, SupersedeProfile};

use crate::event_store::StoredEvent;
use crate::projections::ProfileReadModel;

/// An activation the policy has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub profile_id: AggregateId,
    pub activated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleActiveProfile;

impl SingleActiveProfile {
    /// Activations among freshly committed events. Payloads that fail to
    /// decode are skipped; the command that wrote them already succeeded.
    pub fn activations(committed: &[StoredEvent]) -> Vec<Activation> {
        committed
            .iter()
            .filter(|stored| stored.event_type == ProfileEvent::ACTIVATED)
            .filter_map(|stored| match stored.decode::<ProfileEvent>() {
                Ok(ProfileEvent::ProfileActivated(e)) => Some(Activation {
                    profile_id: e.profile_id,
                    activated_at: e.activated_at,
                }),
                _ => None,
            })
            .collect()
    }

    /// Commands that step down every other active profile of `user_id`.
    pub fn react(activation: Activation, user_id: UserId, rows: &[ProfileReadModel]) -> Vec<ProfileCommand> {
        rows.iter()
            .filter(|row| row.user_id == user_id && row.active && row.profile_id != activation.profile_id)
            .map(|row| {
                ProfileCommand::SupersedeProfile(SupersedeProfile {
                    profile_id: row.profile_id,
                    superseded_by: activation.profile_id,
                    occurred_at: activation.activated_at,
                })
            })
            .collect()
    }
}
