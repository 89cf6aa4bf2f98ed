//! Property-based tests (fuzzing) for offline-sync.
//!
//! Uses proptest to generate random inputs and verify ordering and
//! accounting invariants hold, and that garbage in storage never panics
//! the read path.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use offline_sync::eviction::{EvictionCandidate, PriorityFifoPolicy};
use offline_sync::{
    CacheItem, CacheManager, IndexRange, MutationDescriptor, MutationQueue, OfflineSyncConfig, Partition, Priority,
    SetOptions, StorageEngine,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::Medium), Just(Priority::High)]
}

fn candidate_strategy() -> impl Strategy<Value = Vec<EvictionCandidate>> {
    prop::collection::vec((priority_strategy(), 0i64..1_000, 1u64..5_000), 0..40).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (priority, timestamp, size_bytes))| EvictionCandidate {
                id: format!("k{:03}", i),
                size_bytes,
                priority,
                timestamp,
            })
            .collect()
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Cache metrics
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// hit_rate + miss_rate == 1 after any sequence of lookups
    #[test]
    fn prop_hit_and_miss_rates_sum_to_one(lookups in prop::collection::vec(any::<bool>(), 1..60)) {
        runtime().block_on(async {
            let cache = CacheManager::new(Arc::new(StorageEngine::in_memory()), OfflineSyncConfig::default());
            cache.set("api/present", &json!(1), SetOptions::default()).await.unwrap();

            for hit in &lookups {
                let key = if *hit { "api/present" } else { "api/absent" };
                let _ = cache.get::<Value>(key).await;
            }

            let metrics = cache.metrics();
            let hits = lookups.iter().filter(|h| **h).count() as u64;
            prop_assert_eq!(metrics.total_requests, lookups.len() as u64);
            prop_assert_eq!(metrics.total_hits, hits);
            prop_assert_eq!(metrics.total_hits + metrics.total_misses, metrics.total_requests);
            prop_assert_eq!(metrics.hit_rate + metrics.miss_rate, 1.0);
            Ok(())
        })?;
    }

    /// Garbage payloads stored under cache keys are misses, never panics
    #[test]
    fn fuzz_cache_get_on_garbage(data in ".*", compressed in any::<bool>()) {
        runtime().block_on(async {
            let storage = Arc::new(StorageEngine::in_memory());
            let item = CacheItem {
                id: "api/fuzz".to_string(),
                data,
                timestamp: 0,
                expiry: None,
                metadata: offline_sync::cache::CacheItemMetadata {
                    strategy_name: "api".to_string(),
                    priority: Priority::Medium,
                    size_bytes: 0,
                    compressed,
                },
            };
            storage.put(Partition::Cache, &item).await.unwrap();

            let cache = CacheManager::new(storage, OfflineSyncConfig::default());
            let _ = cache.get::<Value>("api/fuzz").await;
            prop_assert_eq!(cache.metrics().total_requests, 1);
            Ok(())
        })?;
    }
}

// =============================================================================
// Eviction
// =============================================================================

proptest! {
    /// Victims are a prefix of the (priority, timestamp) order and cover the
    /// overage whenever enough mass exists
    #[test]
    fn prop_eviction_order_and_budget(candidates in candidate_strategy(), overage in 0u64..100_000) {
        let total: u64 = candidates.iter().map(|c| c.size_bytes).sum();
        let plan = PriorityFifoPolicy.select_victims(candidates.clone(), overage);

        prop_assert_eq!(plan.target_met, total >= overage);
        if total >= overage {
            prop_assert!(plan.planned_bytes >= overage);
        } else {
            prop_assert_eq!(plan.victims.len(), candidates.len());
        }

        let mut ordered = candidates;
        PriorityFifoPolicy.order(&mut ordered);
        let expected: Vec<String> = ordered.into_iter().take(plan.victims.len()).map(|c| c.id).collect();
        prop_assert_eq!(plan.victims, expected);
    }
}

// =============================================================================
// Mutation queue ordering
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Higher priority always first; within a band, older first
    #[test]
    fn prop_queue_order(entries in prop::collection::vec((priority_strategy(), 0i64..50), 0..30)) {
        runtime().block_on(async {
            let storage = Arc::new(StorageEngine::in_memory());
            for (i, (priority, timestamp)) in entries.iter().enumerate() {
                let record = json!({
                    "id": format!("mut_{:03}", i),
                    "url": "/api/x",
                    "method": "PUT",
                    "timestamp": timestamp,
                    "retryCount": 0,
                    "description": "",
                    "priority": priority,
                });
                storage.put(Partition::Mutations, &record).await.unwrap();
            }

            let queue = MutationQueue::new(storage).get_mutation_queue().await.unwrap();
            prop_assert_eq!(queue.len(), entries.len());
            for pair in queue.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.priority >= b.priority);
                if a.priority == b.priority {
                    prop_assert!(a.timestamp <= b.timestamp);
                }
            }
            Ok(())
        })?;
    }

    /// Retry increments are exact and touch nothing else
    #[test]
    fn prop_retry_monotonic(increments in 0usize..10) {
        runtime().block_on(async {
            let queue = MutationQueue::new(Arc::new(StorageEngine::in_memory()));
            let id = queue
                .queue_mutation(MutationDescriptor::new("POST", "/api/y").with_body(json!({"n": 1})))
                .await
                .unwrap();
            let before = queue.get(&id).await.unwrap().unwrap();

            for _ in 0..increments {
                prop_assert!(queue.increment_mutation_retry(&id).await.unwrap());
            }

            let after = queue.get(&id).await.unwrap().unwrap();
            prop_assert_eq!(after.retry_count as usize, increments);
            prop_assert_eq!(after.url, before.url);
            prop_assert_eq!(after.timestamp, before.timestamp);
            prop_assert_eq!(after.body, before.body);
            Ok(())
        })?;
    }
}

// =============================================================================
// Index range queries
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Range queries return exactly the records whose index value is in range
    #[test]
    fn prop_range_query_matches_filter(
        stamps in prop::collection::vec(-1_000i64..1_000, 0..40),
        lo in -1_000i64..1_000,
        span in 0i64..1_000,
    ) {
        runtime().block_on(async {
            let storage = StorageEngine::in_memory();
            for (i, ts) in stamps.iter().enumerate() {
                storage
                    .put(Partition::FileCache, &json!({"url": format!("f{}", i), "blob": "", "timestamp": ts}))
                    .await
                    .unwrap();
            }

            let range = IndexRange::between(lo, lo + span);
            let found: Vec<Value> = storage
                .get_by_index_range(Partition::FileCache, "timestamp", &range)
                .await
                .unwrap();

            let expected = stamps.iter().filter(|ts| **ts >= lo && **ts <= lo + span).count();
            prop_assert_eq!(found.len(), expected);
            Ok(())
        })?;
    }
}
