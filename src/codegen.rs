//! Referral code generation.
//!
//! Codes are drawn uniformly from a fixed alphabet and pre-checked against
//! the store. The pre-check does not reserve anything: the store's unique
//! index on `referral_code` is the final authority, and the lifecycle
//! manager retries when an insert loses a race.

use rand::Rng;

use crate::config::{CodeConfig, ConfigError};
use crate::error::ReferralError;
use crate::store::RegistrationStore;
use crate::types::ReferralCode;

/// Draws referral codes that are unused at the time of the check.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    alphabet: Vec<u8>,
    length: usize,
    max_attempts: u32,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        let config = CodeConfig::default();
        Self {
            alphabet: config.alphabet.into_bytes(),
            length: config.length,
            max_attempts: config.max_attempts,
        }
    }
}

impl CodeGenerator {
    /// Create a generator, validating the configuration.
    pub fn new(config: &CodeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            alphabet: config.alphabet.as_bytes().to_vec(),
            length: config.length,
            max_attempts: config.max_attempts,
        })
    }

    /// Draw one candidate. Synchronous so the thread-local RNG never
    /// lives across an await point.
    pub fn candidate(&self) -> ReferralCode {
        let mut rng = rand::thread_rng();
        let code: String = (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())] as char)
            .collect();
        ReferralCode::from_normalized(code)
    }

    /// Produce a code no record currently holds.
    ///
    /// Retries on collision up to the configured attempt budget, then fails
    /// with `GenerationExhausted`.
    pub async fn generate_unique_code<S>(&self, store: &S) -> Result<ReferralCode, ReferralError>
    where
        S: RegistrationStore + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate();
            match store.find_by_code(&candidate).await? {
                None => return Ok(candidate),
                Some(_) => {
                    tracing::debug!(attempt, code = %candidate, "Referral code collision, redrawing");
                }
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            length = self.length,
            alphabet_size = self.alphabet.len(),
            "Referral code generation exhausted"
        );
        Err(ReferralError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Number of distinct codes this generator can produce, saturating.
    pub fn keyspace(&self) -> u128 {
        (self.alphabet.len() as u128).saturating_pow(self.length as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRegistrationStore;
    use crate::types::{NewRegistration, ProfileFields, UserId};
    use chrono::Utc;

    fn tiny_config() -> CodeConfig {
        CodeConfig {
            length: 1,
            alphabet: "AB".to_string(),
            max_attempts: 32,
        }
    }

    async fn occupy(store: &InMemoryRegistrationStore, user: &str, code: &str) {
        store
            .insert(NewRegistration {
                user_id: UserId::parse(user).unwrap(),
                referral_code: ReferralCode::parse(code).unwrap(),
                referred_by: None,
                profile: ProfileFields::default(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_candidate_shape() {
        let generator = CodeGenerator::new(&CodeConfig::default()).unwrap();
        for _ in 0..100 {
            let code = generator.candidate();
            assert_eq!(code.len(), 8);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
            assert_eq!(ReferralCode::parse(code.as_str()).as_ref(), Some(&code));
        }
    }

    #[test]
    fn test_keyspace() {
        let generator = CodeGenerator::new(&CodeConfig::default()).unwrap();
        assert_eq!(generator.keyspace(), 36u128.pow(8));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = tiny_config();
        config.alphabet = "A".to_string();
        assert!(CodeGenerator::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_retries_past_collisions() {
        let store = InMemoryRegistrationStore::new();
        occupy(&store, "first", "A").await;

        let generator = CodeGenerator::new(&tiny_config()).unwrap();
        // With "A" taken, every successful draw must be "B".
        for _ in 0..10 {
            let code = generator.generate_unique_code(&store).await.unwrap();
            assert_eq!(code.as_str(), "B");
        }
    }

    #[tokio::test]
    async fn test_exhausted_when_keyspace_full() {
        let store = InMemoryRegistrationStore::new();
        occupy(&store, "first", "A").await;
        occupy(&store, "second", "B").await;

        let generator = CodeGenerator::new(&tiny_config()).unwrap();
        let err = generator.generate_unique_code(&store).await.unwrap_err();
        assert_eq!(err, ReferralError::GenerationExhausted { attempts: 32 });
    }

    #[tokio::test]
    async fn test_store_outage_is_reported() {
        let store = InMemoryRegistrationStore::new();
        store.set_available(false);
        let generator = CodeGenerator::new(&tiny_config()).unwrap();
        let err = generator.generate_unique_code(&store).await.unwrap_err();
        assert!(matches!(err, ReferralError::StoreUnavailable(_)));
    }
}
