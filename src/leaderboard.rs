//! Leaderboard aggregation.
//!
//! Every call scans the current attribution edges; nothing is cached.
//!
//! ## Ordering
//!
//! 1. Referral count, descending
//! 2. Referrer `created_at`, ascending (earlier registrant wins a tie)
//! 3. Referrer id, ascending (only matters for identical timestamps)

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ReferralError;
use crate::store::RegistrationStore;
use crate::types::{Leaderboard, LeaderboardEntry, ReferralEdge, RegistrationId, RegistrationRecord};

/// Computes the top-referrer ranking from the store.
pub struct LeaderboardAggregator<S: RegistrationStore> {
    store: Arc<S>,
    max_limit: usize,
}

impl<S: RegistrationStore> LeaderboardAggregator<S> {
    /// Create an aggregator. `max_limit` caps every request and is at least 1.
    pub fn new(store: Arc<S>, max_limit: usize) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    /// Top referrers, at most `limit` of them.
    ///
    /// Referrers with no attributed registrations never appear. An empty
    /// store yields an empty leaderboard.
    pub async fn top_referrers(&self, limit: usize) -> Result<Leaderboard, ReferralError> {
        let limit = limit.min(self.max_limit);
        if limit == 0 {
            return Ok(Leaderboard::default());
        }

        let edges = self.store.scan_referred().await?;
        let counts = count_by_referrer(&edges);
        if counts.is_empty() {
            return Ok(Leaderboard::default());
        }

        let referrer_ids: Vec<RegistrationId> = counts.keys().copied().collect();
        let referrers = self.store.find_by_ids(&referrer_ids).await?;
        if referrers.len() < referrer_ids.len() {
            warn!(
                expected = referrer_ids.len(),
                found = referrers.len(),
                "Skipping leaderboard edges whose referrer record is missing"
            );
        }

        let leaderboard = rank(&counts, referrers, limit);
        debug!(
            edges = edges.len(),
            referrers = counts.len(),
            returned = leaderboard.len(),
            "Leaderboard computed"
        );
        Ok(leaderboard)
    }
}

/// Count attribution edges per referrer.
pub fn count_by_referrer(edges: &[ReferralEdge]) -> BTreeMap<RegistrationId, u64> {
    let mut counts: BTreeMap<RegistrationId, u64> = BTreeMap::new();
    for edge in edges {
        *counts.entry(edge.referred_by).or_default() += 1;
    }
    counts
}

/// Order referrers by count and tie-break keys, keep the first `limit`,
/// and number them from 1.
pub fn rank(
    counts: &BTreeMap<RegistrationId, u64>,
    referrers: Vec<RegistrationRecord>,
    limit: usize,
) -> Leaderboard {
    let mut scored: Vec<(u64, RegistrationRecord)> = referrers
        .into_iter()
        .filter_map(|r| counts.get(&r.id).copied().filter(|&c| c > 0).map(|c| (c, r)))
        .collect();

    scored.sort_by(|(count_a, a), (count_b, b)| {
        count_b
            .cmp(count_a)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let entries = scored
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (count, record))| LeaderboardEntry {
            rank: i + 1,
            referrer_id: record.id,
            display_name: record.display_name().to_string(),
            referral_code: record.referral_code,
            count,
            referrer_created_at: record.created_at,
        })
        .collect();

    Leaderboard::new(entries)
}
