//! In-memory registration store for testing and single-process use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::{NewRegistration, ReferralCode, ReferralEdge, RegistrationId, RegistrationRecord, UserId};
use super::{RegistrationStore, StoreError, UniqueField};

#[derive(Debug, Default)]
struct Inner {
    /// Records by ID.
    records: BTreeMap<RegistrationId, RegistrationRecord>,
    /// Unique index: code -> record.
    by_code: BTreeMap<ReferralCode, RegistrationId>,
    /// Unique index: user -> record.
    by_user: BTreeMap<UserId, RegistrationId>,
    /// Last assigned id.
    last_id: u128,
}

/// In-memory registration store.
///
/// Uses BTreeMap indexes for deterministic iteration order and assigns
/// sequential UUIDs, so ids sort in insertion order. Uniqueness and the
/// `referred_by` reference rule are checked under a single write lock,
/// which makes every insert and update atomic.
#[derive(Debug)]
pub struct InMemoryRegistrationStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl Default for InMemoryRegistrationStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryRegistrationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True if no records exist.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// All records, ordered by id.
    pub fn all_records(&self) -> Vec<RegistrationRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn insert(&self, record: NewRegistration) -> Result<RegistrationRecord, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write();

        if inner.by_user.contains_key(&record.user_id) {
            return Err(StoreError::DuplicateKey(UniqueField::UserId));
        }
        if inner.by_code.contains_key(&record.referral_code) {
            return Err(StoreError::DuplicateKey(UniqueField::ReferralCode));
        }
        if let Some(referrer) = record.referred_by {
            if !inner.records.contains_key(&referrer) {
                return Err(StoreError::InvalidReference);
            }
        }

        inner.last_id += 1;
        let id = RegistrationId::new(Uuid::from_u128(inner.last_id));
        let committed = RegistrationRecord {
            id,
            user_id: record.user_id,
            referral_code: record.referral_code,
            referred_by: record.referred_by,
            profile: record.profile,
            created_at: record.created_at,
        };

        inner.by_user.insert(committed.user_id.clone(), id);
        inner.by_code.insert(committed.referral_code.clone(), id);
        inner.records.insert(id, committed.clone());
        Ok(committed)
    }

    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<RegistrationRecord>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read();
        Ok(inner
            .by_code
            .get(code)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<RegistrationRecord>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read();
        Ok(inner
            .by_user
            .get(user_id)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &RegistrationId) -> Result<Option<RegistrationRecord>, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().records.get(id).cloned())
    }

    async fn find_by_ids(&self, ids: &[RegistrationId]) -> Result<Vec<RegistrationRecord>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read();
        let mut found: Vec<RegistrationRecord> = ids
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        Ok(found)
    }

    async fn update_referred_by(
        &self,
        id: &RegistrationId,
        referrer: &RegistrationId,
    ) -> Result<RegistrationRecord, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write();

        if id == referrer || !inner.records.contains_key(referrer) {
            return Err(StoreError::InvalidReference);
        }
        let record = inner.records.get_mut(id).ok_or(StoreError::NotFound)?;
        record.referred_by = Some(*referrer);
        Ok(record.clone())
    }

    async fn scan_referred(&self) -> Result<Vec<ReferralEdge>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter_map(|r| {
                r.referred_by.map(|referred_by| ReferralEdge {
                    referred_by,
                    referee: r.id,
                    created_at: r.created_at,
                })
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
