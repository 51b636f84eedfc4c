//! Core types for the referral kernel.

pub mod ids;
pub mod record;
pub mod leaderboard;

pub use ids::{RegistrationId, UserId, ReferralCode};
pub use record::{ProfileFields, RegistrationRecord, NewRegistration, ReferralEdge};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
