//! Identifier types for registrations.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store-assigned identifier of a registration record.
///
/// Wraps a UUID and implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Create a new RegistrationId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a new RegistrationId from a UUID string.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RegistrationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of the authenticated principal that owns a registration.
///
/// Issued by the external identity provider. Always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse a user id, trimming surrounding whitespace.
    ///
    /// Returns `None` for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short, human-shareable referral code.
///
/// Always held in normalized form: trimmed, ASCII upper-case, `[A-Z0-9]+`.
/// Two codes compare equal exactly when their normalized forms do, so
/// `"ab12cd34"` and `"AB12CD34"` name the same referrer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Normalize user-supplied input into a code.
    ///
    /// Returns `None` if the input is empty after trimming or contains
    /// anything other than ASCII letters and digits.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.is_empty() || !normalized.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(normalized))
    }

    /// Wrap an already-normalized code produced by the generator or read
    /// back from the store.
    pub(crate) fn from_normalized(code: String) -> Self {
        debug_assert!(ReferralCode::parse(&code).map(|c| c.0 == code).unwrap_or(false));
        Self(code)
    }

    /// Borrow the normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Code length in characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed code; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
