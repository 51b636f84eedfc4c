//! Engine configuration.
//!
//! ## Environment
//!
//! - `REFERRAL_CODE_LENGTH` (default: 8)
//! - `REFERRAL_CODE_ALPHABET` (default: `A-Z0-9`)
//! - `REFERRAL_CODE_MAX_ATTEMPTS` (default: 16)
//! - `REFERRAL_INSERT_RETRIES` (default: 1)
//! - `REFERRAL_REJECT_CYCLES` (default: false)
//! - `REFERRAL_MAX_CYCLE_DEPTH` (default: 64)
//! - `LEADERBOARD_DEFAULT_LIMIT` (default: 10)
//! - `LEADERBOARD_MAX_LIMIT` (default: 100)

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Upper-case letters and digits.
pub const DEFAULT_CODE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default referral code length. 36^8 ≈ 2.8e12 possible codes.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Code length of zero.
    #[error("referral code length must be at least 1")]
    ZeroCodeLength,
    /// Alphabet too small to generate distinct codes.
    #[error("referral code alphabet needs at least 2 distinct characters")]
    AlphabetTooSmall,
    /// Alphabet contains characters a normalized code cannot hold.
    #[error("referral code alphabet may only contain A-Z and 0-9, found {0:?}")]
    InvalidAlphabetChar(char),
    /// No attempts allowed.
    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

/// Referral code shape and generation budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Characters per code.
    pub length: usize,
    /// Characters a code is drawn from.
    pub alphabet: String,
    /// Candidates drawn before giving up with `GenerationExhausted`.
    pub max_attempts: u32,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
            alphabet: DEFAULT_CODE_ALPHABET.to_string(),
            max_attempts: 16,
        }
    }
}

impl CodeConfig {
    /// Check the alphabet and limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.length == 0 {
            return Err(ConfigError::ZeroCodeLength);
        }
        if let Some(bad) = self
            .alphabet
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit()))
        {
            return Err(ConfigError::InvalidAlphabetChar(bad));
        }
        let distinct: BTreeSet<char> = self.alphabet.chars().collect();
        if distinct.len() < 2 {
            return Err(ConfigError::AlphabetTooSmall);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroLimit("max_attempts"));
        }
        Ok(())
    }
}

/// Configuration for the registration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Code generation settings.
    pub code: CodeConfig,
    /// Extra generate-and-insert rounds after the store reports a duplicate code.
    pub insert_retries: u32,
    /// Reject attributions that would close a multi-hop referral loop.
    pub reject_cycles: bool,
    /// Hops walked when `reject_cycles` is set.
    pub max_cycle_depth: usize,
    /// Leaderboard size when the caller does not ask for one.
    pub default_leaderboard_limit: usize,
    /// Largest leaderboard ever returned.
    pub max_leaderboard_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code: CodeConfig::default(),
            insert_retries: 1,
            reject_cycles: false,
            max_cycle_depth: 64,
            default_leaderboard_limit: 10,
            max_leaderboard_limit: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            code: CodeConfig {
                length: env_or("REFERRAL_CODE_LENGTH", defaults.code.length),
                alphabet: std::env::var("REFERRAL_CODE_ALPHABET")
                    .map(|s| s.trim().to_ascii_uppercase())
                    .unwrap_or(defaults.code.alphabet),
                max_attempts: env_or("REFERRAL_CODE_MAX_ATTEMPTS", defaults.code.max_attempts),
            },
            insert_retries: env_or("REFERRAL_INSERT_RETRIES", defaults.insert_retries),
            reject_cycles: env_or("REFERRAL_REJECT_CYCLES", defaults.reject_cycles),
            max_cycle_depth: env_or("REFERRAL_MAX_CYCLE_DEPTH", defaults.max_cycle_depth),
            default_leaderboard_limit: env_or("LEADERBOARD_DEFAULT_LIMIT", defaults.default_leaderboard_limit),
            max_leaderboard_limit: env_or("LEADERBOARD_MAX_LIMIT", defaults.max_leaderboard_limit),
        }
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.code.validate()?;
        if self.reject_cycles && self.max_cycle_depth == 0 {
            return Err(ConfigError::ZeroLimit("max_cycle_depth"));
        }
        if self.max_leaderboard_limit == 0 {
            return Err(ConfigError::ZeroLimit("max_leaderboard_limit"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_alphabet() {
        let mut config = CodeConfig::default();
        config.alphabet = "abc".to_string();
        assert_eq!(config.validate(), Err(ConfigError::InvalidAlphabetChar('a')));

        config.alphabet = "AAAA".to_string();
        assert_eq!(config.validate(), Err(ConfigError::AlphabetTooSmall));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = EngineConfig::default();
        config.code.length = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCodeLength));

        let mut config = EngineConfig::default();
        config.code.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroLimit("max_attempts")));
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let vars = [
            ("REFERRAL_CODE_LENGTH", "10"),
            ("REFERRAL_CODE_ALPHABET", "ABC123"),
            ("REFERRAL_CODE_MAX_ATTEMPTS", "4"),
            ("REFERRAL_INSERT_RETRIES", "3"),
            ("REFERRAL_REJECT_CYCLES", "true"),
            ("REFERRAL_MAX_CYCLE_DEPTH", "12"),
            ("LEADERBOARD_DEFAULT_LIMIT", "5"),
            ("LEADERBOARD_MAX_LIMIT", "50"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let config = EngineConfig::from_env();
        for (key, _) in vars {
            std::env::remove_var(key);
        }

        assert_eq!(config.code.length, 10);
        assert_eq!(config.code.alphabet, "ABC123");
        assert_eq!(config.code.max_attempts, 4);
        assert_eq!(config.insert_retries, 3);
        assert!(config.reject_cycles);
        assert_eq!(config.max_cycle_depth, 12);
        assert_eq!(config.default_leaderboard_limit, 5);
        assert_eq!(config.max_leaderboard_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
