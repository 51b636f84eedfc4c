//! Registration lifecycle: first-time registration and referral application.
//!
//! Two explicit entry points share the same record model:
//!
//! - [`RegistrationManager::register`] creates a record. A bad referral code
//!   does not block registration; it comes back as a warning.
//! - [`RegistrationManager::apply_referral`] attributes (or re-attributes) an
//!   existing registrant, creating a bare record first if the user has none.
//!   A bad code fails the call and leaves `referred_by` untouched.
//!
//! Uniqueness of codes and users is decided by the store at insert time.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attribution::{ActingParty, AttributionResolver};
use crate::codegen::CodeGenerator;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{insert_error, ReferralError, ReferralRejection};
use crate::store::{RegistrationStore, StoreError, UniqueField};
use crate::types::{NewRegistration, ProfileFields, ReferralCode, RegistrationId, RegistrationRecord, UserId};

/// Result of a successful [`RegistrationManager::register`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    /// The committed record.
    pub record: RegistrationRecord,
    /// Set when a referral code was supplied but could not be applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_warning: Option<ReferralRejection>,
}

/// Result of a successful [`RegistrationManager::apply_referral`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralApplied {
    /// The acting registrant's record after the call.
    pub record: RegistrationRecord,
    /// Referrer now recorded in `referred_by`.
    pub referrer_id: RegistrationId,
    /// Referrer before the call.
    pub previous_referrer: Option<RegistrationId>,
    /// True if the record was created by this call.
    pub created_record: bool,
    /// False when the code was already applied and nothing was written.
    pub changed: bool,
}

/// Orchestrates code generation, attribution and persistence.
pub struct RegistrationManager<S: RegistrationStore> {
    store: Arc<S>,
    generator: CodeGenerator,
    resolver: AttributionResolver,
    config: EngineConfig,
}

impl<S: RegistrationStore> RegistrationManager<S> {
    /// Create a manager over `store`.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator = CodeGenerator::new(&config.code)?;
        let resolver = if config.reject_cycles {
            AttributionResolver::with_cycle_check(config.max_cycle_depth)
        } else {
            AttributionResolver::new()
        }
        .with_max_code_length(config.code.length);
        Ok(Self {
            store,
            generator,
            resolver,
            config,
        })
    }

    /// Create a manager with [`EngineConfig::default`].
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self {
            store,
            generator: CodeGenerator::default(),
            resolver: AttributionResolver::new(),
            config: EngineConfig::default(),
        }
    }

    /// Register `user_id` for the first time.
    ///
    /// Fails with `AlreadyRegistered` if the user has a record, including
    /// when a concurrent call for the same user commits first.
    pub async fn register(
        &self,
        user_id: &UserId,
        profile: ProfileFields,
        supplied_code: Option<&str>,
    ) -> Result<RegistrationOutcome, ReferralError> {
        if self.store.find_by_user_id(user_id).await?.is_some() {
            return Err(ReferralError::AlreadyRegistered(user_id.clone()));
        }

        let code = self.generator.generate_unique_code(self.store.as_ref()).await?;

        let mut referral_warning = None;
        let referred_by = match supplied_code.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(supplied) => {
                let acting = ActingParty::pending(user_id, &code);
                match self.resolver.resolve(self.store.as_ref(), &acting, supplied).await {
                    Ok(referrer) => Some(referrer),
                    Err(err) => match ReferralRejection::from_error(&err) {
                        Some(rejection) => {
                            warn!(
                                user_id = %user_id,
                                supplied_code = supplied,
                                reason = ?rejection,
                                "Referral code ignored at registration"
                            );
                            referral_warning = Some(rejection);
                            None
                        }
                        None => return Err(err),
                    },
                }
            }
        };

        let record = self.insert_with_retry(user_id, profile, referred_by, code).await?;

        info!(
            user_id = %user_id,
            record_id = %record.id,
            referral_code = %record.referral_code,
            referred_by = ?record.referred_by,
            "Registration created"
        );

        Ok(RegistrationOutcome {
            record,
            referral_warning,
        })
    }

    /// Attribute `user_id` to the holder of `supplied_code`.
    ///
    /// Re-applying the current referrer's code is a no-op; a different valid
    /// code replaces the previous referrer. `CodeNotFound` and
    /// `SelfReferral` fail the call without changing `referred_by`.
    pub async fn apply_referral(
        &self,
        user_id: &UserId,
        supplied_code: &str,
    ) -> Result<ReferralApplied, ReferralError> {
        let (record, created_record) = self.ensure_record(user_id).await?;

        let acting = ActingParty::from_record(&record);
        let referrer_id = match self.resolver.resolve(self.store.as_ref(), &acting, supplied_code).await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    supplied_code = supplied_code.trim(),
                    error = %err,
                    "Referral code rejected"
                );
                return Err(err);
            }
        };

        let previous_referrer = record.referred_by;
        if previous_referrer == Some(referrer_id) {
            debug!(user_id = %user_id, referrer_id = %referrer_id, "Referral already applied");
            return Ok(ReferralApplied {
                record,
                referrer_id,
                previous_referrer,
                created_record,
                changed: false,
            });
        }

        let updated = self
            .store
            .update_referred_by(&record.id, &referrer_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => ReferralError::NotRegistered(user_id.clone()),
                StoreError::InvalidReference => ReferralError::code_not_found(supplied_code),
                other => other.into(),
            })?;

        info!(
            user_id = %user_id,
            record_id = %updated.id,
            referrer_id = %referrer_id,
            previous_referrer = ?previous_referrer,
            "Referral applied"
        );

        Ok(ReferralApplied {
            record: updated,
            referrer_id,
            previous_referrer,
            created_record,
            changed: true,
        })
    }

    /// The user's own referral code.
    pub async fn get_own_code(&self, user_id: &UserId) -> Result<ReferralCode, ReferralError> {
        self.get_registration(user_id)
            .await
            .map(|record| record.referral_code)
    }

    /// The user's full record.
    pub async fn get_registration(&self, user_id: &UserId) -> Result<RegistrationRecord, ReferralError> {
        self.store
            .find_by_user_id(user_id)
            .await?
            .ok_or_else(|| ReferralError::NotRegistered(user_id.clone()))
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the user's record, creating a bare one if none exists.
    async fn ensure_record(&self, user_id: &UserId) -> Result<(RegistrationRecord, bool), ReferralError> {
        if let Some(record) = self.store.find_by_user_id(user_id).await? {
            return Ok((record, false));
        }

        let code = self.generator.generate_unique_code(self.store.as_ref()).await?;
        match self.insert_with_retry(user_id, ProfileFields::default(), None, code).await {
            Ok(record) => {
                info!(
                    user_id = %user_id,
                    record_id = %record.id,
                    referral_code = %record.referral_code,
                    "Registration created while applying referral"
                );
                Ok((record, true))
            }
            Err(ReferralError::AlreadyRegistered(_)) => {
                // A concurrent call won the insert; continue with its record.
                let record = self
                    .store
                    .find_by_user_id(user_id)
                    .await?
                    .ok_or_else(|| ReferralError::NotRegistered(user_id.clone()))?;
                Ok((record, false))
            }
            Err(err) => Err(err),
        }
    }

    /// Insert a new record, drawing a fresh code each time the store
    /// reports the code as taken.
    async fn insert_with_retry(
        &self,
        user_id: &UserId,
        profile: ProfileFields,
        referred_by: Option<RegistrationId>,
        first_code: ReferralCode,
    ) -> Result<RegistrationRecord, ReferralError> {
        let created_at = Utc::now();
        let mut code = first_code;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let new = NewRegistration {
                user_id: user_id.clone(),
                referral_code: code.clone(),
                referred_by,
                profile: profile.clone(),
                created_at,
            };

            match self.store.insert(new).await {
                Ok(record) => return Ok(record),
                Err(StoreError::DuplicateKey(UniqueField::ReferralCode)) => {
                    if attempts > self.config.insert_retries {
                        warn!(
                            user_id = %user_id,
                            attempts,
                            "Referral code still colliding on insert"
                        );
                        return Err(ReferralError::DuplicateCode { attempts });
                    }
                    debug!(user_id = %user_id, code = %code, "Referral code taken at insert, regenerating");
                    code = self.generator.generate_unique_code(self.store.as_ref()).await?;
                }
                Err(err) => return Err(insert_error(err, user_id)),
            }
        }
    }
}
