//! Property-Based Tests for the Cache Levels
//!
//! # Test Properties
//!
//! 1. **LRU**: after any access sequence the cache holds exactly the `c` most
//!    recently touched distinct keys, in recency order
//! 2. **TTL**: a read strictly after expiry behaves exactly like a miss
//! 3. **Compression Roundtrip**: decompress(compress(p)) = p, and compression
//!    never returns an output that is not smaller than its input
//! 4. **Version Idempotence**: migrating to the same version is a no-op

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use super::compression::{CompressionAlgorithm, CompressionCodec};
use super::local::{LocalCache, LocalCacheConfig};
use super::version::{KeyVersionManager, Migration, SchemaVersion};
use crate::clock::ManualClock;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Set(u8),
    Get(u8),
}

/// Operations over a small key space so keys collide often
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..12).prop_map(Op::Set), (0u8..12).prop_map(Op::Get)]
}

/// Payloads straddling the 1 KiB compression threshold
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..3000),
        // repetitive text compresses well
        ("[a-d]{1,8}", 100usize..600).prop_map(|(s, n)| s.repeat(n).into_bytes()),
    ]
}

fn version_strategy() -> impl Strategy<Value = SchemaVersion> {
    prop_oneof![
        Just(SchemaVersion::V1),
        Just(SchemaVersion::V2),
        Just(SchemaVersion::V3),
    ]
}

fn cache_with_capacity(capacity: usize) -> LocalCache {
    LocalCache::with_config(
        LocalCacheConfig {
            capacity,
            ..Default::default()
        },
        Arc::new(ManualClock::default()),
    )
}

// =============================================================================
// L1 Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: L1 contents always match a reference LRU model.
    #[test]
    fn prop_lru_matches_model(
        capacity in 1usize..6,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let cache = cache_with_capacity(capacity);
        // least recently used at the front
        let mut model: VecDeque<String> = VecDeque::new();

        for op in ops {
            match op {
                Op::Set(k) => {
                    let key = format!("k{k}");
                    cache.set(key.clone(), json!(k));
                    model.retain(|m| m != &key);
                    model.push_back(key);
                    if model.len() > capacity {
                        model.pop_front();
                    }
                }
                Op::Get(k) => {
                    let key = format!("k{k}");
                    let hit = cache.get(&key);
                    let present = model.iter().position(|m| m == &key);
                    prop_assert_eq!(hit.is_some(), present.is_some());
                    if let Some(pos) = present {
                        prop_assert_eq!(hit, Some(json!(k)));
                        if let Some(touched) = model.remove(pos) {
                            model.push_back(touched);
                        }
                    }
                }
            }
            prop_assert!(cache.len() <= capacity);
        }

        prop_assert_eq!(cache.keys(), model.into_iter().collect::<Vec<_>>());
    }

    /// Property: an entry is served up to and including its expiry instant and
    /// never after; an expired read mutates state exactly like a miss.
    #[test]
    fn prop_ttl_expiry_is_a_miss(ttl_secs in 1i64..3600, elapsed in 0i64..7200) {
        let clock = Arc::new(ManualClock::default());
        let cache = LocalCache::with_config(LocalCacheConfig::default(), clock.clone());

        cache.set_with_ttl("k", json!("v"), Some(chrono::Duration::seconds(ttl_secs)));
        clock.advance(chrono::Duration::seconds(elapsed));

        let got = cache.get("k");
        let stats = cache.stats();
        if elapsed <= ttl_secs {
            prop_assert_eq!(got, Some(json!("v")));
            prop_assert_eq!(stats.hits, 1);
            prop_assert_eq!(stats.expirations, 0);
        } else {
            prop_assert_eq!(got, None);
            prop_assert_eq!(stats.misses, 1);
            prop_assert_eq!(stats.expirations, 1);
            prop_assert!(cache.is_empty());
        }
    }
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: compression round-trips and never expands.
    #[test]
    fn prop_compression_roundtrip(
        data in payload_strategy(),
        zlib in any::<bool>(),
        level in 1u32..=9,
    ) {
        let codec = CompressionCodec::new();
        let algorithm = if zlib { CompressionAlgorithm::Zlib } else { CompressionAlgorithm::Gzip };

        let (compressed, used) = codec.compress_with(&data, algorithm, level);
        if data.len() < 1024 {
            prop_assert_eq!(used, CompressionAlgorithm::None);
        }
        if used != CompressionAlgorithm::None {
            prop_assert!(compressed.len() < data.len());
        } else {
            prop_assert_eq!(&compressed[..], &data[..]);
        }

        let restored = codec.decompress(&compressed, used);
        prop_assert_eq!(&restored[..], &data[..]);
    }

    /// Property: migrating to the same version returns the value untouched,
    /// even when migrations are registered.
    #[test]
    fn prop_migrate_same_version_is_identity(
        version in version_strategy(),
        text in ".{0,32}",
        number in any::<i64>(),
    ) {
        let manager = KeyVersionManager::default();
        manager.register(
            SchemaVersion::V1,
            SchemaVersion::V2,
            Migration::new(|_| Ok(json!("rewritten"))),
        );

        let value = json!({"text": text, "n": number});
        prop_assert_eq!(manager.migrate(value.clone(), version, version), value);
    }
}
