//! Property tests for leaderboard ranking.
//!
//! Referrers and edges are generated from small index spaces so ties on
//! count and on `created_at` are common.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use referral_kernel::leaderboard::{count_by_referrer, rank};
use referral_kernel::{ProfileFields, ReferralCode, ReferralEdge, RegistrationId, RegistrationRecord, UserId};
use uuid::Uuid;

fn id(n: u128) -> RegistrationId {
    RegistrationId::new(Uuid::from_u128(n))
}

fn record(n: u128, created_secs: i64) -> RegistrationRecord {
    RegistrationRecord {
        id: id(n),
        user_id: UserId::parse(&format!("user-{n}")).unwrap(),
        referral_code: ReferralCode::parse(&format!("R{n:07}")).unwrap(),
        referred_by: None,
        profile: ProfileFields::named(format!("referrer {n}")),
        created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
    }
}

/// Up to 12 referrers with coarse timestamps, and edges pointing at them.
fn population() -> impl Strategy<Value = (Vec<RegistrationRecord>, Vec<ReferralEdge>)> {
    prop::collection::vec(0i64..4, 1..12).prop_flat_map(|created| {
        let referrers: Vec<RegistrationRecord> = created
            .iter()
            .enumerate()
            .map(|(i, secs)| record(i as u128 + 1, *secs))
            .collect();
        let n = referrers.len() as u128;
        let edges = prop::collection::vec(1..=n, 0..40).prop_map(|targets| {
            targets
                .into_iter()
                .enumerate()
                .map(|(i, target)| ReferralEdge {
                    referred_by: id(target),
                    referee: id(1_000 + i as u128),
                    created_at: Utc.timestamp_opt(100, 0).unwrap(),
                })
                .collect::<Vec<_>>()
        });
        (Just(referrers), edges)
    })
}

proptest! {
    #[test]
    fn prop_never_exceeds_limit((referrers, edges) in population(), limit in 0usize..15) {
        let counts = count_by_referrer(&edges);
        let board = rank(&counts, referrers, limit);
        prop_assert!(board.len() <= limit);
        prop_assert!(board.len() <= counts.len());
    }

    #[test]
    fn prop_no_zero_counts((referrers, edges) in population()) {
        let counts = count_by_referrer(&edges);
        let board = rank(&counts, referrers, usize::MAX);
        prop_assert_eq!(board.len(), counts.len());
        for entry in &board {
            prop_assert!(entry.count > 0);
            prop_assert_eq!(Some(&entry.count), counts.get(&entry.referrer_id));
        }
    }

    #[test]
    fn prop_sorted_with_tie_breaks((referrers, edges) in population()) {
        let counts = count_by_referrer(&edges);
        let board = rank(&counts, referrers, usize::MAX);
        for (i, entry) in board.iter().enumerate() {
            prop_assert_eq!(entry.rank, i + 1);
        }
        for pair in board.entries().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let ordered = a.count > b.count
                || (a.count == b.count && a.referrer_created_at < b.referrer_created_at)
                || (a.count == b.count
                    && a.referrer_created_at == b.referrer_created_at
                    && a.referrer_id < b.referrer_id);
            prop_assert!(ordered, "{:?} ranked above {:?}", a, b);
        }
    }

    #[test]
    fn prop_total_count_preserved((referrers, edges) in population()) {
        let counts = count_by_referrer(&edges);
        let board = rank(&counts, referrers, usize::MAX);
        let total: u64 = board.iter().map(|e| e.count).sum();
        prop_assert_eq!(total, edges.len() as u64);
    }
}
