//! Leaderboard output types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ReferralCode, RegistrationId};

/// One ranked referrer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    /// The referrer's record.
    pub referrer_id: RegistrationId,
    /// Display name of the referrer.
    pub display_name: String,
    /// The referrer's code.
    pub referral_code: ReferralCode,
    /// Number of registrations attributed to this referrer. Always > 0.
    pub count: u64,
    /// When the referrer registered (tie-break key).
    pub referrer_created_at: DateTime<Utc>,
}

/// Ranked list of top referrers.
///
/// A finite snapshot computed at call time. It can be iterated by reference
/// any number of times and yields the same order each time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub(crate) fn new(entries: Vec<LeaderboardEntry>) -> Self {
        Self { entries }
    }

    /// Iterate entries in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, LeaderboardEntry> {
        self.entries.iter()
    }

    /// Entries as a slice.
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Number of ranked referrers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody has referred anyone.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest ranked entry.
    pub fn leader(&self) -> Option<&LeaderboardEntry> {
        self.entries.first()
    }
}

impl IntoIterator for Leaderboard {
    type Item = LeaderboardEntry;
    type IntoIter = std::vec::IntoIter<LeaderboardEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Leaderboard {
    type Item = &'a LeaderboardEntry;
    type IntoIter = std::slice::Iter<'a, LeaderboardEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
