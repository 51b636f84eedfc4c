//! Referral attribution: turning a supplied code into a referrer id.
//!
//! The resolver only reads. Writing `referred_by` is the lifecycle
//! manager's job.
//!
//! Only direct self-reference is rejected by default. Longer loops
//! (A refers B, B refers A) can form when two registrants apply each
//! other's codes concurrently; they do not corrupt counts and are accepted
//! unless [`AttributionResolver::with_cycle_check`] is enabled.

use std::collections::HashSet;

use crate::config::DEFAULT_CODE_LENGTH;
use crate::error::ReferralError;
use crate::store::RegistrationStore;
use crate::types::{ReferralCode, RegistrationId, RegistrationRecord, UserId};

/// The registrant applying a code.
#[derive(Debug, Clone, Copy)]
pub struct ActingParty<'a> {
    /// Owning principal.
    pub user_id: &'a UserId,
    /// Existing record id, if the registrant already has one.
    pub record_id: Option<RegistrationId>,
    /// The registrant's own code, if already assigned.
    pub own_code: Option<&'a ReferralCode>,
}

impl<'a> ActingParty<'a> {
    /// Acting party for an existing record.
    pub fn from_record(record: &'a RegistrationRecord) -> Self {
        Self {
            user_id: &record.user_id,
            record_id: Some(record.id),
            own_code: Some(&record.referral_code),
        }
    }

    /// Acting party for a registration that has not been persisted yet.
    pub fn pending(user_id: &'a UserId, own_code: &'a ReferralCode) -> Self {
        Self {
            user_id,
            record_id: None,
            own_code: Some(own_code),
        }
    }
}

/// Validates referral codes against the store.
#[derive(Debug, Clone)]
pub struct AttributionResolver {
    /// Inputs longer than this never reach the store.
    max_code_length: usize,
    /// `Some(depth)` enables the multi-hop loop check.
    cycle_depth: Option<usize>,
}

impl Default for AttributionResolver {
    fn default() -> Self {
        Self {
            max_code_length: DEFAULT_CODE_LENGTH,
            cycle_depth: None,
        }
    }
}

impl AttributionResolver {
    /// Resolver that only rejects direct self-reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject attributions that would close a loop of up to
    /// `max_depth` hops.
    pub fn with_cycle_check(max_depth: usize) -> Self {
        Self {
            cycle_depth: Some(max_depth),
            ..Self::default()
        }
    }

    /// Set the longest code accepted for lookup. Match the generator's
    /// configured length.
    pub fn with_max_code_length(mut self, length: usize) -> Self {
        self.max_code_length = length;
        self
    }

    /// Resolve `supplied` to the referrer's record id.
    ///
    /// Fails with `CodeNotFound` if the input is not a well-formed code or
    /// nobody holds it, and with `SelfReferral` if it is the acting
    /// registrant's own code or record.
    pub async fn resolve<S>(
        &self,
        store: &S,
        acting: &ActingParty<'_>,
        supplied: &str,
    ) -> Result<RegistrationId, ReferralError>
    where
        S: RegistrationStore + ?Sized,
    {
        let trimmed = supplied.trim();
        if trimmed.len() > self.max_code_length {
            let prefix: String = trimmed.chars().take(self.max_code_length).collect();
            return Err(ReferralError::code_not_found(&format!("{prefix}...")));
        }
        let code = ReferralCode::parse(trimmed).ok_or_else(|| ReferralError::code_not_found(trimmed))?;

        // Checked before the lookup so a stale read cannot let it through.
        if acting.own_code == Some(&code) {
            return Err(ReferralError::SelfReferral);
        }

        let referrer = store
            .find_by_code(&code)
            .await?
            .ok_or_else(|| ReferralError::code_not_found(supplied))?;

        if acting.record_id == Some(referrer.id) || &referrer.user_id == acting.user_id {
            return Err(ReferralError::SelfReferral);
        }

        if let (Some(depth), Some(own_id)) = (self.cycle_depth, acting.record_id) {
            check_cycle(store, own_id, &referrer, depth).await?;
        }

        Ok(referrer.id)
    }
}

/// Walk `referrer`'s chain of `referred_by` links and fail if it reaches
/// `own_id` within `max_depth` hops.
pub async fn check_cycle<S>(
    store: &S,
    own_id: RegistrationId,
    referrer: &RegistrationRecord,
    max_depth: usize,
) -> Result<(), ReferralError>
where
    S: RegistrationStore + ?Sized,
{
    let mut seen: HashSet<RegistrationId> = HashSet::new();
    let mut next = referrer.referred_by;

    for _ in 0..max_depth {
        let Some(id) = next else {
            return Ok(());
        };
        if id == own_id {
            tracing::warn!(record_id = %own_id, referrer_id = %referrer.id, "Referral cycle rejected");
            return Err(ReferralError::ReferralCycle);
        }
        if !seen.insert(id) {
            // A pre-existing loop that does not include us.
            return Ok(());
        }
        next = store.find_by_id(&id).await?.and_then(|r| r.referred_by);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRegistrationStore;
    use crate::types::{NewRegistration, ProfileFields};
    use chrono::Utc;

    async fn add(
        store: &InMemoryRegistrationStore,
        user: &str,
        code: &str,
        referred_by: Option<RegistrationId>,
    ) -> RegistrationRecord {
        store
            .insert(NewRegistration {
                user_id: UserId::parse(user).unwrap(),
                referral_code: ReferralCode::parse(code).unwrap(),
                referred_by,
                profile: ProfileFields::named(user),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolves_existing_code_case_insensitively() {
        let store = InMemoryRegistrationStore::new();
        let x = add(&store, "x", "AB12CD34", None).await;
        let y = add(&store, "y", "ZZZZ0000", None).await;

        let resolver = AttributionResolver::new();
        let id = resolver
            .resolve(&store, &ActingParty::from_record(&y), " ab12cd34 ")
            .await
            .unwrap();
        assert_eq!(id, x.id);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_codes() {
        let store = InMemoryRegistrationStore::new();
        let y = add(&store, "y", "ZZZZ0000", None).await;
        let resolver = AttributionResolver::new();
        let acting = ActingParty::from_record(&y);

        let err = resolver.resolve(&store, &acting, "NOPE0000").await.unwrap_err();
        assert_eq!(err, ReferralError::CodeNotFound("NOPE0000".into()));

        let err = resolver.resolve(&store, &acting, "does-not-exist").await.unwrap_err();
        assert!(matches!(err, ReferralError::CodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_overlong_input_never_reaches_store() {
        let store = InMemoryRegistrationStore::new();
        let y = add(&store, "y", "ZZZZ0000", None).await;
        let resolver = AttributionResolver::new();

        // An unavailable store proves the lookup is skipped.
        store.set_available(false);
        let huge = "A".repeat(1 << 20);
        let err = resolver
            .resolve(&store, &ActingParty::from_record(&y), &huge)
            .await
            .unwrap_err();
        assert_eq!(err, ReferralError::CodeNotFound("AAAAAAAA...".into()));

        let err = AttributionResolver::new()
            .with_max_code_length(4)
            .resolve(&store, &ActingParty::from_record(&y), "ZZZZ0000")
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::CodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_own_code_is_self_referral() {
        let store = InMemoryRegistrationStore::new();
        let x = add(&store, "x", "AB12CD34", None).await;
        let resolver = AttributionResolver::new();

        let err = resolver
            .resolve(&store, &ActingParty::from_record(&x), "ab12cd34")
            .await
            .unwrap_err();
        assert_eq!(err, ReferralError::SelfReferral);
    }

    #[tokio::test]
    async fn test_self_referral_detected_without_known_code() {
        // Caller has not learned its own code yet; the lookup still catches it.
        let store = InMemoryRegistrationStore::new();
        let x = add(&store, "x", "AB12CD34", None).await;
        let resolver = AttributionResolver::new();
        let acting = ActingParty {
            user_id: &x.user_id,
            record_id: None,
            own_code: None,
        };

        let err = resolver.resolve(&store, &acting, "AB12CD34").await.unwrap_err();
        assert_eq!(err, ReferralError::SelfReferral);
    }

    #[tokio::test]
    async fn test_cycles_allowed_by_default() {
        let store = InMemoryRegistrationStore::new();
        let a = add(&store, "a", "AAAA1111", None).await;
        let b = add(&store, "b", "BBBB2222", Some(a.id)).await;

        // a applying b's code closes a -> b -> a.
        let id = AttributionResolver::new()
            .resolve(&store, &ActingParty::from_record(&a), "BBBB2222")
            .await
            .unwrap();
        assert_eq!(id, b.id);
    }

    #[tokio::test]
    async fn test_cycle_check_rejects_loops() {
        let store = InMemoryRegistrationStore::new();
        let a = add(&store, "a", "AAAA1111", None).await;
        let b = add(&store, "b", "BBBB2222", Some(a.id)).await;
        let c = add(&store, "c", "CCCC3333", Some(b.id)).await;

        let resolver = AttributionResolver::with_cycle_check(8);
        let err = resolver
            .resolve(&store, &ActingParty::from_record(&a), "CCCC3333")
            .await
            .unwrap_err();
        assert_eq!(err, ReferralError::ReferralCycle);

        // A chain that does not lead back to the actor is fine.
        let d = add(&store, "d", "DDDD4444", None).await;
        let id = resolver
            .resolve(&store, &ActingParty::from_record(&d), "CCCC3333")
            .await
            .unwrap();
        assert_eq!(id, c.id);
    }
}
