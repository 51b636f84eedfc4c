//! # referral-kernel
//!
//! Referral attribution and leaderboard engine for event registrations.
//!
//! Every registrant gets a unique referral code and may be attributed to
//! exactly one other registrant. The kernel answers two questions:
//!
//! > Who referred this registrant? Who referred the most people?
//!
//! ## Core Contract
//!
//! 1. `register` creates a record with a fresh, globally unique code
//! 2. `apply_referral` attributes a registrant to the holder of a code,
//!    idempotently, creating the record if needed
//! 3. `top_referrers` ranks referrers by attributed registrations
//!
//! ## Architecture
//!
//! ```text
//! caller → RegistrationManager ─┬→ CodeGenerator ──────┐
//!                               └→ AttributionResolver ┤
//!                                                      ↓
//!                                    RegistrationStore (Postgres or Memory)
//!                                                      ↑
//! caller → LeaderboardAggregator ──────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Codes and user ids are unique; the store's unique indexes decide
//! - `referred_by` never points at the record itself and is never cleared
//! - Leaderboard order is count desc, then earliest registrant, then id

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod store;
pub mod config;
pub mod error;
pub mod codegen;
pub mod attribution;
pub mod lifecycle;
pub mod leaderboard;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    RegistrationId, UserId, ReferralCode, ProfileFields, RegistrationRecord, NewRegistration,
    ReferralEdge, Leaderboard, LeaderboardEntry,
};
pub use store::{RegistrationStore, StoreError, UniqueField, InMemoryRegistrationStore};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresRegistrationStore};
pub use config::{CodeConfig, EngineConfig, ConfigError, DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH};
pub use error::{ReferralError, ReferralRejection};
pub use codegen::CodeGenerator;
pub use attribution::{ActingParty, AttributionResolver};
pub use lifecycle::{RegistrationManager, RegistrationOutcome, ReferralApplied};
pub use leaderboard::LeaderboardAggregator;

#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version of the registrations table and API payloads.
/// Increment on breaking changes to any schema type.
pub const REFERRAL_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
