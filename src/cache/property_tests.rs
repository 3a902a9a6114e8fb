//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the codec, the L1 tier and the eviction strategies
//! against arbitrary inputs and operation sequences.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::cache::{
    CacheEntry, CacheKey, EvictionPolicy, KeyOptions, L1Cache, StatsCollector, TagSet,
};

// == Test Configuration ==
const TEST_TTL: Duration = Duration::from_secs(300);

// == Strategies ==
/// Generates valid raw keys (allowed charset, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_:.-]{0,63}"
}

/// Generates tags with mixed case, so normalization has work to do
fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}"
}

fn policy_strategy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lfu),
        Just(EvictionPolicy::Fifo),
    ]
}

#[derive(Debug, Clone)]
enum L1Op {
    Set { key: String },
    Get { key: String },
    Delete { key: String },
}

fn l1_op_strategy() -> impl Strategy<Value = L1Op> {
    // A small key space so operations collide
    let key = "k[0-9]{1,2}";
    prop_oneof![
        key.prop_map(|key| L1Op::Set { key }),
        key.prop_map(|key| L1Op::Get { key }),
        key.prop_map(|key| L1Op::Delete { key }),
    ]
}

fn entry(key: &str) -> Arc<CacheEntry> {
    Arc::new(CacheEntry::new(json!(key), TEST_TTL, None))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Property: Key Normalization Is Idempotent**
    // *For any* valid raw key, building a key from the normalized raw part
    // SHALL yield the same qualified key.
    #[test]
    fn prop_key_normalization_idempotent(
        raw in valid_key_strategy(),
        pad in " {0,3}",
    ) {
        let options = KeyOptions {
            version: Some("v2".to_string()),
            ..KeyOptions::default()
        };
        let padded = format!("{}{}{}", pad, raw, pad);

        let first = CacheKey::create(&padded, &options).unwrap();
        let second = CacheKey::create(first.raw(), &options).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.as_str(), format!("v2:{}", raw));
    }

    // **Property: Invalid Characters Are Rejected**
    // *For any* key containing whitespace inside it, creation SHALL fail.
    #[test]
    fn prop_inner_whitespace_rejected(
        left in "[a-z]{1,8}",
        right in "[a-z]{1,8}",
    ) {
        let raw = format!("{} {}", left, right);
        prop_assert!(CacheKey::create(&raw, &KeyOptions::default()).is_err());
    }

    // **Property: Tag Sets Are Deduplicated**
    // *For any* list of tags, the resulting set SHALL contain each
    // lowercase tag exactly once, in first-seen order.
    #[test]
    fn prop_tag_set_dedup(tags in prop::collection::vec(tag_strategy(), 0..10)) {
        let set = TagSet::create(&tags, 10, 128).unwrap();

        let mut seen = HashSet::new();
        let expected: Vec<String> = tags
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| seen.insert(t.clone()))
            .collect();
        let actual: Vec<String> = set.iter().map(|t| t.to_string()).collect();

        prop_assert_eq!(actual, expected);
    }

    // **Property: Tag Count Limit**
    // *For any* list longer than the limit, creation SHALL fail, even if
    // duplicates would bring it under the limit.
    #[test]
    fn prop_tag_count_limit(tag in tag_strategy(), extra in 1usize..5) {
        let tags = vec![tag; 3 + extra];
        prop_assert!(TagSet::create(&tags, 3, 128).is_err());
    }

    // **Property: Capacity Enforcement**
    // *For any* sequence of operations and any eviction policy, L1 SHALL
    // never hold more than its capacity, and the size counter SHALL match.
    #[test]
    fn prop_l1_capacity_enforcement(
        policy in policy_strategy(),
        capacity in 1usize..10,
        ops in prop::collection::vec(l1_op_strategy(), 1..100),
    ) {
        let stats = Arc::new(StatsCollector::new());
        let l1 = L1Cache::new(capacity, policy.build(), Arc::clone(&stats));

        for op in ops {
            match op {
                L1Op::Set { key } => {
                    l1.set(&key, entry(&key), TEST_TTL).unwrap();
                }
                L1Op::Get { key } => {
                    let _ = l1.get(&key);
                }
                L1Op::Delete { key } => {
                    l1.delete(&key);
                }
            }
            prop_assert!(l1.len() <= capacity, "L1 size {} exceeds {}", l1.len(), capacity);
        }

        prop_assert_eq!(stats.snapshot().l1.size, l1.len());
    }

    // **Property: Hit/Miss Accounting**
    // *For any* sequence of operations, every L1 read SHALL count as
    // exactly one hit or one miss.
    #[test]
    fn prop_l1_statistics_accuracy(ops in prop::collection::vec(l1_op_strategy(), 1..50)) {
        let stats = Arc::new(StatsCollector::new());
        let l1 = L1Cache::new(1000, EvictionPolicy::Lru.build(), Arc::clone(&stats));
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                L1Op::Set { key } => {
                    l1.set(&key, entry(&key), TEST_TTL).unwrap();
                }
                L1Op::Get { key } => match l1.get(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                L1Op::Delete { key } => {
                    l1.delete(&key);
                }
            }
        }

        let snapshot = stats.snapshot();
        prop_assert_eq!(snapshot.l1.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(snapshot.l1.misses, expected_misses, "Misses mismatch");
    }

    // **Property: LRU Eviction Order**
    // *For any* full LRU cache where the oldest key was read last, inserting
    // a new key SHALL evict the second-oldest key instead.
    #[test]
    fn prop_lru_access_tracking(
        keys in prop::collection::vec(valid_key_strategy(), 3..8),
        new_key in valid_key_strategy(),
    ) {
        let unique_keys: Vec<String> = {
            let mut seen = HashSet::new();
            keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
        };
        prop_assume!(unique_keys.len() >= 3);
        prop_assume!(!unique_keys.contains(&new_key));

        let l1 = L1Cache::new(
            unique_keys.len(),
            EvictionPolicy::Lru.build(),
            Arc::new(StatsCollector::new()),
        );
        for key in &unique_keys {
            l1.set(key, entry(key), TEST_TTL).unwrap();
        }

        let accessed = &unique_keys[0];
        let _ = l1.get(accessed);

        let evicted = l1.set(&new_key, entry(&new_key), TEST_TTL).unwrap();

        prop_assert_eq!(evicted.as_deref(), Some(unique_keys[1].as_str()));
        prop_assert!(l1.contains(accessed), "Accessed key '{}' was evicted", accessed);
        prop_assert!(l1.contains(&new_key));
    }

    // **Property: Entry Timestamps Are Ordered**
    // *For any* TTL and stale time, `cached_at <= stale_at <= expires_at`.
    #[test]
    fn prop_entry_timestamps_ordered(
        now in 0u64..4_000_000_000_000,
        ttl_ms in 0u64..1_000_000,
        stale_ms in prop::option::of(0u64..1_000_000),
    ) {
        let entry = CacheEntry::at(
            json!(null),
            now,
            Duration::from_millis(ttl_ms),
            stale_ms.map(Duration::from_millis),
        );

        prop_assert!(entry.cached_at <= entry.stale_at);
        prop_assert!(entry.stale_at <= entry.expires_at);
        prop_assert_eq!(entry.stale_at, now + ttl_ms);
    }
}
