//! Registration record storage backends.
//!
//! The store is the only shared mutable state in the system and the single
//! authority on uniqueness: both `user_id` and `referral_code` are unique
//! indexes enforced at insert time. Engine-side pre-checks are only an
//! optimization.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::types::{NewRegistration, ReferralCode, ReferralEdge, RegistrationId, RegistrationRecord, UserId};

/// Unique index that rejected an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueField {
    /// `user_id` (one record per principal).
    UserId,
    /// `referral_code` (globally unique codes).
    ReferralCode,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserId => write!(f, "user_id"),
            Self::ReferralCode => write!(f, "referral_code"),
        }
    }
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate key on {0}")]
    DuplicateKey(UniqueField),
    /// The addressed record does not exist.
    #[error("record not found")]
    NotFound,
    /// `referred_by` points at a missing record or at the record itself.
    #[error("invalid referral reference")]
    InvalidReference,
    /// Timeout, connection failure or any other transport problem.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create an unavailable error from any error type.
    pub fn unavailable<E: fmt::Display>(err: E) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Data-access contract for registration records.
///
/// Implementations must be thread-safe; every engine operation may run
/// concurrently with any other. Lookups return `Ok(None)` for a miss.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert a record atomically, assigning its `id`.
    ///
    /// Fails with `DuplicateKey` if `user_id` or `referral_code` is taken,
    /// and with `InvalidReference` if `referred_by` does not exist.
    async fn insert(&self, record: NewRegistration) -> Result<RegistrationRecord, StoreError>;

    /// Look up a record by its (normalized) referral code.
    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<RegistrationRecord>, StoreError>;

    /// Look up the record owned by a user.
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<RegistrationRecord>, StoreError>;

    /// Look up a record by id.
    async fn find_by_id(&self, id: &RegistrationId) -> Result<Option<RegistrationRecord>, StoreError>;

    /// Fetch several records by id, ordered by id. Missing ids are skipped.
    async fn find_by_ids(&self, ids: &[RegistrationId]) -> Result<Vec<RegistrationRecord>, StoreError>;

    /// Single-row update of `referred_by`.
    ///
    /// Fails with `NotFound` if `id` does not exist and with
    /// `InvalidReference` if `referrer` is missing or equals `id`.
    async fn update_referred_by(
        &self,
        id: &RegistrationId,
        referrer: &RegistrationId,
    ) -> Result<RegistrationRecord, StoreError>;

    /// All attribution edges. May reflect a slightly stale snapshot.
    async fn scan_referred(&self) -> Result<Vec<ReferralEdge>, StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: RegistrationStore + ?Sized> RegistrationStore for Arc<S> {
    async fn insert(&self, record: NewRegistration) -> Result<RegistrationRecord, StoreError> {
        (**self).insert(record).await
    }

    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<RegistrationRecord>, StoreError> {
        (**self).find_by_code(code).await
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<RegistrationRecord>, StoreError> {
        (**self).find_by_user_id(user_id).await
    }

    async fn find_by_id(&self, id: &RegistrationId) -> Result<Option<RegistrationRecord>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[RegistrationId]) -> Result<Vec<RegistrationRecord>, StoreError> {
        (**self).find_by_ids(ids).await
    }

    async fn update_referred_by(
        &self,
        id: &RegistrationId,
        referrer: &RegistrationId,
    ) -> Result<RegistrationRecord, StoreError> {
        (**self).update_referred_by(id, referrer).await
    }

    async fn scan_referred(&self) -> Result<Vec<ReferralEdge>, StoreError> {
        (**self).scan_referred().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}

pub use memory::InMemoryRegistrationStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresRegistrationStore, PoolStats, REGISTRATION_TABLE_SCHEMA};
