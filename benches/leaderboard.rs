//! Performance benchmarks for leaderboard computation.
//!
//! Run with: `cargo bench --bench leaderboard`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Rank 10k edges | <5ms | Pure count and sort |
//! | top_referrers over memory store | <20ms | Includes scan and id lookup |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use referral_kernel::leaderboard::{count_by_referrer, rank};
use referral_kernel::{
    InMemoryRegistrationStore, LeaderboardAggregator, ProfileFields, ReferralCode, ReferralEdge,
    RegistrationId, RegistrationManager, RegistrationRecord, UserId,
};
use uuid::Uuid;

fn make_record(n: u128) -> RegistrationRecord {
    RegistrationRecord {
        id: RegistrationId::new(Uuid::from_u128(n)),
        user_id: UserId::parse(&format!("user-{n}")).unwrap(),
        referral_code: ReferralCode::parse(&format!("B{n:07}")).unwrap(),
        referred_by: None,
        profile: ProfileFields::named(format!("referrer {n}")),
        created_at: Utc.timestamp_opt(n as i64, 0).unwrap(),
    }
}

/// `edges` edges spread over `referrers` referrers with a skewed distribution.
fn make_edges(referrers: u128, edges: u128) -> Vec<ReferralEdge> {
    (0..edges)
        .map(|i| ReferralEdge {
            referred_by: RegistrationId::new(Uuid::from_u128((i * i) % referrers + 1)),
            referee: RegistrationId::new(Uuid::from_u128(1_000_000 + i)),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        })
        .collect()
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");

    for edge_count in [1_000u128, 10_000, 100_000] {
        let referrers: Vec<RegistrationRecord> = (1..=500).map(make_record).collect();
        let edges = make_edges(500, edge_count);

        group.throughput(Throughput::Elements(edge_count as u64));
        group.bench_with_input(BenchmarkId::new("edges", edge_count), &edges, |b, edges| {
            b.iter(|| {
                let counts = count_by_referrer(black_box(edges));
                rank(&counts, referrers.clone(), 10)
            })
        });
    }

    group.finish();
}

fn bench_top_referrers(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryRegistrationStore::new());
    let manager = RegistrationManager::with_defaults(Arc::clone(&store));

    runtime.block_on(async {
        let mut codes = Vec::new();
        for i in 0..100 {
            let user = UserId::parse(&format!("referrer-{i}")).unwrap();
            let outcome = manager.register(&user, ProfileFields::default(), None).await.unwrap();
            codes.push(outcome.record.referral_code);
        }
        for i in 0..5_000usize {
            let user = UserId::parse(&format!("referee-{i}")).unwrap();
            let code = &codes[(i * 7) % codes.len()];
            manager.apply_referral(&user, code.as_str()).await.unwrap();
        }
    });

    let aggregator = LeaderboardAggregator::new(Arc::clone(&store), 100);
    c.bench_function("top_referrers_memory_5k", |b| {
        b.iter(|| runtime.block_on(aggregator.top_referrers(black_box(10))).unwrap())
    });
}

criterion_group!(benches, bench_rank, bench_top_referrers);
criterion_main!(benches);
