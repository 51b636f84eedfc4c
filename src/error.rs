//! Error types at the engine boundary.

use serde::{Deserialize, Serialize};

use crate::store::{StoreError, UniqueField};
use crate::types::UserId;

/// Error returned by the registration and leaderboard operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferralError {
    /// A record already exists for this user.
    #[error("user {0} is already registered")]
    AlreadyRegistered(UserId),
    /// No record exists for this user.
    #[error("user {0} is not registered")]
    NotRegistered(UserId),
    /// The caller supplied an empty user id.
    #[error("user id must not be empty")]
    InvalidUserId,
    /// No registrant holds the supplied code.
    #[error("referral code not found: {0}")]
    CodeNotFound(String),
    /// The supplied code belongs to the acting user.
    #[error("a registrant cannot refer themselves")]
    SelfReferral,
    /// Attributing would close a referral loop.
    #[error("referral would create a cycle")]
    ReferralCycle,
    /// The store kept rejecting freshly generated codes as duplicates.
    #[error("referral code collided on insert after {attempts} attempts")]
    DuplicateCode {
        /// Number of inserts attempted.
        attempts: u32,
    },
    /// No unused code was found within the configured attempt budget.
    #[error("referral code generation exhausted after {attempts} attempts")]
    GenerationExhausted {
        /// Number of candidates drawn.
        attempts: u32,
    },
    /// The store timed out or could not be reached.
    #[error("registration store unavailable: {0}")]
    StoreUnavailable(String),
    /// The store rejected the operation for an integrity reason.
    #[error("registration store rejected the operation: {0}")]
    Store(StoreError),
}

impl ReferralError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "ALREADY_REGISTERED",
            Self::NotRegistered(_) => "NOT_REGISTERED",
            Self::InvalidUserId => "INVALID_USER_ID",
            Self::CodeNotFound(_) => "CODE_NOT_FOUND",
            Self::SelfReferral => "SELF_REFERRAL",
            Self::ReferralCycle => "REFERRAL_CYCLE",
            Self::DuplicateCode { .. } => "DUPLICATE_CODE",
            Self::GenerationExhausted { .. } => "GENERATION_EXHAUSTED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Store(_) => "STORE_REJECTED",
        }
    }

    /// Message suitable for showing to the registrant.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "You're already registered.",
            Self::NotRegistered(_) => "You haven't registered yet.",
            Self::InvalidUserId => "Please sign in again.",
            Self::CodeNotFound(_) => "That referral code doesn't exist.",
            Self::SelfReferral => "You can't refer yourself.",
            Self::ReferralCycle => "That registrant was referred by you, so they can't refer you.",
            Self::DuplicateCode { .. }
            | Self::StoreUnavailable(_) => "Something went wrong on our side. Please try again.",
            Self::GenerationExhausted { .. } | Self::Store(_) => {
                "Something went wrong on our side. Please contact the organizers."
            }
        }
    }

    /// True for failures a caller may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::DuplicateCode { .. })
    }

    pub(crate) fn code_not_found(code: &str) -> Self {
        Self::CodeNotFound(code.trim().to_string())
    }
}

impl From<StoreError> for ReferralError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Store(other),
        }
    }
}

/// Why a referral code supplied at registration was not applied.
///
/// Registration itself succeeds; this is reported alongside the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferralRejection {
    /// No registrant holds the code.
    CodeNotFound,
    /// The code is the registrant's own.
    SelfReferral,
}

impl ReferralRejection {
    /// Message suitable for showing to the registrant.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CodeNotFound => ReferralError::CodeNotFound(String::new()).user_message(),
            Self::SelfReferral => ReferralError::SelfReferral.user_message(),
        }
    }

    pub(crate) fn from_error(err: &ReferralError) -> Option<Self> {
        match err {
            ReferralError::CodeNotFound(_) => Some(Self::CodeNotFound),
            ReferralError::SelfReferral => Some(Self::SelfReferral),
            _ => None,
        }
    }
}

/// Translate an insert failure into the engine's vocabulary.
pub(crate) fn insert_error(err: StoreError, user_id: &UserId) -> ReferralError {
    match err {
        StoreError::DuplicateKey(UniqueField::UserId) => ReferralError::AlreadyRegistered(user_id.clone()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_maps_to_store_unavailable() {
        let err: ReferralError = StoreError::Unavailable("timeout".into()).into();
        assert_eq!(err, ReferralError::StoreUnavailable("timeout".into()));
        assert!(err.is_transient());
    }

    #[test]
    fn test_duplicate_user_maps_to_already_registered() {
        let user = UserId::parse("u1").unwrap();
        let err = insert_error(StoreError::DuplicateKey(UniqueField::UserId), &user);
        assert_eq!(err, ReferralError::AlreadyRegistered(user));
    }

    #[test]
    fn test_rejection_from_error() {
        assert_eq!(
            ReferralRejection::from_error(&ReferralError::SelfReferral),
            Some(ReferralRejection::SelfReferral)
        );
        assert_eq!(ReferralRejection::from_error(&ReferralError::ReferralCycle), None);
        assert_eq!(ReferralRejection::SelfReferral.user_message(), "You can't refer yourself.");
    }
}
