//! Registration records and the attribution edges derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ReferralCode, RegistrationId, UserId};

/// Profile fields captured by the registration form.
///
/// Only `display_name` is read by this crate (the leaderboard shows it);
/// the rest is carried through to the store untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    /// Name shown on the leaderboard.
    #[serde(default)]
    pub display_name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// School, company or community the registrant belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl ProfileFields {
    /// Profile with only a display name.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

/// One registrant.
///
/// `referral_code` is assigned once at creation and never changes.
/// `referred_by`, when set, points at another record and never at `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Store-assigned identifier.
    pub id: RegistrationId,
    /// Owning principal; at most one record per user.
    pub user_id: UserId,
    /// This registrant's own shareable code.
    pub referral_code: ReferralCode,
    /// The registrant this one was attributed to.
    pub referred_by: Option<RegistrationId>,
    /// Form data.
    pub profile: ProfileFields,
    /// First creation time, used for leaderboard tie-breaking.
    pub created_at: DateTime<Utc>,
}

impl RegistrationRecord {
    /// Name to show for this registrant, falling back to the code.
    pub fn display_name(&self) -> &str {
        let name = self.profile.display_name.trim();
        if name.is_empty() {
            self.referral_code.as_str()
        } else {
            name
        }
    }
}

/// Insert payload. The store assigns `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    /// Owning principal.
    pub user_id: UserId,
    /// Freshly generated code.
    pub referral_code: ReferralCode,
    /// Resolved referrer, if any.
    pub referred_by: Option<RegistrationId>,
    /// Form data.
    pub profile: ProfileFields,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A single `referee -> referrer` attribution edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferralEdge {
    /// The referrer (the record's `referred_by`).
    pub referred_by: RegistrationId,
    /// The referred record.
    pub referee: RegistrationId,
    /// Creation time of the referred record.
    pub created_at: DateTime<Utc>,
}
