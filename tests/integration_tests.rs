//! tiercache Integration Tests
//!
//! End-to-end behaviour through the public API:
//! - Multi-level reads, fallback self-heal and invalidation
//! - Degradation when the remote tier stalls
//! - Access pattern classification and predictive preloading

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use tiercache::analytics::{AccessRecord, PatternType, ValueLoader};
use tiercache::cache::{Migration, RemoteTier, RemoteTierStats};
use tiercache::{
    CacheContext, CacheValue, Clock, Config, Error, InMemoryRemoteTier, ManualClock, Result,
    SchemaVersion,
};

fn monday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
}

fn context(config: Config, clock: Arc<ManualClock>) -> (CacheContext, Arc<InMemoryRemoteTier>) {
    let remote = Arc::new(InMemoryRemoteTier::with_clock(clock.clone()));
    let ctx = CacheContext::from_config(config, remote.clone(), clock).unwrap();
    (ctx, remote)
}

// =============================================================================
// Multi-Level Cache
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_lru_scenario_through_coordinator() {
        let config =
            Config::from_yaml_str("cache:\n  namespaces:\n    n: { capacity: 2 }\n").unwrap();
        let (ctx, _) = context(config, Arc::new(ManualClock::new(monday(9))));
        let local = ctx.cache.local("n").unwrap();

        ctx.cache.set("n", "a", json!("A")).await.unwrap();
        ctx.cache.set("n", "b", json!("B")).await.unwrap();
        ctx.cache.get("n", "a").await.unwrap();
        ctx.cache.set("n", "c", json!("C")).await.unwrap();

        assert_eq!(local.keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(local.stats().evictions, 1);

        // b is gone from L1 but L2 still has it
        assert_eq!(ctx.cache.get("n", "b").await.unwrap(), Some(json!("B")));
        assert_eq!(ctx.cache.metrics().l2_hits, 1);
    }

    #[tokio::test]
    async fn test_fallback_self_heal() {
        let clock = Arc::new(ManualClock::new(monday(9)));
        let (ctx, remote) = context(Config::default(), clock.clone());

        ctx.cache.versions().register(
            SchemaVersion::V1,
            SchemaVersion::V2,
            Migration::new(|v: CacheValue| Ok(json!({ "v2": v }))).with_inverse(|v: CacheValue| {
                Ok(v.get("v2").cloned().unwrap_or(CacheValue::Null))
            }),
        );

        let legacy = ctx
            .cache
            .versions()
            .wrap_as(json!({"qty": 4}), SchemaVersion::V1, clock.now());
        remote
            .set(
                "inventory:v1:sku-1",
                Bytes::from(serde_json::to_vec(&legacy).unwrap()),
                None,
            )
            .await
            .unwrap();

        let first = ctx.cache.get("inventory", "sku-1").await.unwrap();
        assert_eq!(first, Some(json!({"v2": {"qty": 4}})));
        assert!(remote.contains("inventory:v2:sku-1"));

        let before = ctx.cache.metrics();
        assert_eq!(before.fallback_hits, 1);
        assert_eq!(before.write_backs, 1);
        assert_eq!(before.l2_hits, 0);

        // second read must come from L2 at the current version
        ctx.cache.local("inventory").unwrap().clear();
        let second = ctx.cache.get("inventory", "sku-1").await.unwrap();
        assert_eq!(second, first);

        let after = ctx.cache.metrics();
        assert_eq!(after.l2_hits, 1);
        assert_eq!(after.fallback_hits, 1);
    }

    #[tokio::test]
    async fn test_downgrade_through_inverse() {
        let clock = Arc::new(ManualClock::new(monday(9)));
        let config = Config::from_yaml_str(
            "cache:\n  current_version: v1\n  fallback_versions: [v2]\n",
        )
        .unwrap();
        let (ctx, remote) = context(config, clock.clone());

        ctx.cache.versions().register(
            SchemaVersion::V1,
            SchemaVersion::V2,
            Migration::new(|v: CacheValue| Ok(json!({ "v2": v }))).with_inverse(|v: CacheValue| {
                Ok(v.get("v2").cloned().unwrap_or(CacheValue::Null))
            }),
        );

        let newer = ctx
            .cache
            .versions()
            .wrap_as(json!({"v2": 7}), SchemaVersion::V2, clock.now());
        remote
            .set("n:v2:k", Bytes::from(serde_json::to_vec(&newer).unwrap()), None)
            .await
            .unwrap();

        assert_eq!(ctx.cache.get("n", "k").await.unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn test_missing_migrator_serves_unmigrated() {
        let clock = Arc::new(ManualClock::new(monday(9)));
        let (ctx, remote) = context(Config::default(), clock.clone());

        let legacy = ctx
            .cache
            .versions()
            .wrap_as(json!("old"), SchemaVersion::V1, clock.now());
        remote
            .set("n:v1:k", Bytes::from(serde_json::to_vec(&legacy).unwrap()), None)
            .await
            .unwrap();

        assert_eq!(ctx.cache.get("n", "k").await.unwrap(), Some(json!("old")));
        assert_eq!(ctx.cache.metrics().migrations, 0);
    }

    #[tokio::test]
    async fn test_compressed_l2_plain_l1() {
        let (ctx, remote) = context(Config::default(), Arc::new(ManualClock::new(monday(9))));
        let report = json!({"rows": vec!["row"; 1000]});

        assert!(ctx.cache.set("reports", "daily", report.clone()).await.unwrap());

        let raw = remote.get("reports:v2:daily").await.unwrap().unwrap();
        let stored: CacheValue = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored["_cache_version"], json!("v2"));
        assert_eq!(stored["data"]["_tiercache_compressed"], json!(true));
        assert_eq!(ctx.cache.peek_local("reports", "daily"), Some(report.clone()));

        ctx.cache.local("reports").unwrap().clear();
        assert_eq!(ctx.cache.get("reports", "daily").await.unwrap(), Some(report));
        assert!(ctx.cache.metrics().bytes_saved > 0);
    }

    #[tokio::test]
    async fn test_small_values_stored_plain() {
        let (ctx, remote) = context(Config::default(), Arc::new(ManualClock::new(monday(9))));
        ctx.cache.set("n", "small", json!({"a": 1})).await.unwrap();

        let raw = remote.get("n:v2:small").await.unwrap().unwrap();
        let stored: CacheValue = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored["data"], json!({"a": 1}));
        assert_eq!(ctx.cache.metrics().compressed_writes, 0);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_across_versions() {
        let (ctx, remote) = context(Config::default(), Arc::new(ManualClock::new(monday(9))));
        ctx.cache.set("users", "42:profile", json!(1)).await.unwrap();
        ctx.cache.set("users", "42:prefs", json!(2)).await.unwrap();
        ctx.cache.set("users", "43:profile", json!(3)).await.unwrap();
        remote
            .set("users:v1:42:legacy", Bytes::from_static(b"0"), None)
            .await
            .unwrap();

        let removed = ctx.cache.invalidate_pattern("users", "42:*").await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(remote.keys(), vec!["users:v2:43:profile".to_string()]);
        assert!(ctx.cache.local("users").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strict_namespace_is_fatal() {
        let config = Config::from_yaml_str(
            "cache:\n  strict_namespaces: true\n  namespaces:\n    users: {}\n",
        )
        .unwrap();
        let (ctx, _) = context(config, Arc::new(ManualClock::new(monday(9))));

        tokio_test::assert_ok!(ctx.cache.get("users", "1").await);
        let err = ctx.cache.delete("payroll", "1").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::UnknownNamespace(_)));
    }

    #[tokio::test]
    async fn test_concurrent_namespaces() {
        let (ctx, _) = context(Config::default(), Arc::new(ManualClock::new(monday(9))));
        let cache = ctx.cache.clone();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let ns = format!("ns{}", worker % 4);
                for i in 0..50 {
                    let key = format!("k{}", i);
                    cache.set(&ns, &key, json!(i)).await.unwrap();
                    assert_eq!(cache.get(&ns, &key).await.unwrap(), Some(json!(i)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats(None).unwrap();
        assert_eq!(stats.namespaces, 4);
        assert_eq!(stats.entries, 200);
        assert_eq!(stats.levels.sets, 400);
    }
}

// =============================================================================
// Remote Tier Degradation
// =============================================================================

mod degradation_tests {
    use super::*;

    /// Remote tier that answers reads only after a long delay
    struct SlowTier {
        inner: InMemoryRemoteTier,
        delay: Duration,
    }

    #[async_trait]
    impl RemoteTier for SlowTier {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
            self.inner.delete_pattern(pattern).await
        }
        async fn ping(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
        fn stats(&self) -> RemoteTierStats {
            self.inner.stats()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reads_become_misses() {
        let clock = Arc::new(ManualClock::new(monday(9)));
        let remote = Arc::new(SlowTier {
            inner: InMemoryRemoteTier::with_clock(clock.clone()),
            delay: Duration::from_secs(2),
        });
        let config = Config::from_yaml_str("cache:\n  remote_timeout_ms: 100\n").unwrap();
        let ctx = CacheContext::from_config(config, remote.clone(), clock).unwrap();

        assert!(ctx.cache.set("n", "k", json!("v")).await.unwrap());

        // L1 still answers
        assert_eq!(ctx.cache.get("n", "k").await.unwrap(), Some(json!("v")));

        // L2 has it, but reads time out
        ctx.cache.local("n").unwrap().clear();
        assert_eq!(ctx.cache.get("n", "k").await.unwrap(), None);
        assert!(ctx.cache.metrics().remote_timeouts >= 1);
        assert!(!ctx.cache.ping().await);
    }
}

// =============================================================================
// Analytics and Preloading
// =============================================================================

mod analytics_tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingLoader {
        loaded: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ValueLoader for RecordingLoader {
        async fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheValue>> {
            self.loaded.lock().push((namespace.into(), key.into()));
            Ok(Some(json!({ "fresh": key })))
        }
    }

    fn record(key: &str, at: DateTime<Utc>, latency_ms: f64) -> AccessRecord {
        AccessRecord {
            namespace: "catalog".into(),
            key: key.into(),
            timestamp: at,
            hit: false,
            latency_ms,
            size_bytes: Some(256),
        }
    }

    #[tokio::test]
    async fn test_classification_through_live_traffic() {
        let clock = Arc::new(ManualClock::new(monday(0)));
        let (ctx, _) = context(Config::default(), clock.clone());
        ctx.cache.set("catalog", "menu", json!([1, 2, 3])).await.unwrap();

        // one read every 20 minutes
        for _ in 0..30 {
            ctx.cache.get("catalog", "menu").await.unwrap();
            clock.advance(chrono::Duration::minutes(20));
        }

        let analysis = ctx.analyzer.key_summary("catalog", "menu").unwrap();
        assert_eq!(analysis.pattern_type, PatternType::Periodic);
        assert_eq!(analysis.access_count, 30);
        assert!((analysis.hit_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_daily_key_preloaded_the_hour_before_peak() {
        let clock = Arc::new(ManualClock::new(monday(0)));
        let (ctx, _) = context(Config::default(), clock.clone());

        // busy at 10:00-10:59 and 15:00-15:59 on five weekdays, slow loads
        for day in 0..5i64 {
            let base = monday(0) + chrono::Duration::days(day);
            for (hour, minute) in [(10, 2), (10, 9), (10, 47), (15, 1), (15, 30)] {
                let at = base + chrono::Duration::hours(hour) + chrono::Duration::minutes(minute);
                ctx.analyzer.push(record("menu", at, 250.0));
            }
        }
        // a burst key that must never be preloaded
        for i in 0..40 {
            let at = monday(3) + chrono::Duration::seconds(i % 4) + chrono::Duration::hours(i / 4 * 7);
            ctx.analyzer.push(record("flash-sale", at, 250.0));
        }

        let patterns = ctx.analyzer.analyze_patterns();
        let menu = patterns.iter().find(|p| p.key == "menu").unwrap();
        assert_eq!(menu.pattern_type, PatternType::Daily);
        assert_eq!(menu.peak_hours, vec![10, 15]);
        assert!(menu.preload_priority >= 5);

        let loader = Arc::new(RecordingLoader {
            loaded: Mutex::new(Vec::new()),
        });
        let preloader = ctx.preloader(loader.clone());

        // 12:00 is not the hour before any peak
        clock.set(monday(12) + chrono::Duration::days(5));
        let report = preloader.run_cycle().await;
        assert_eq!(report.succeeded, 0);
        assert!(ctx.cache.peek_local("catalog", "menu").is_none());

        // 09:xx precedes the 10:00 peak
        clock.set(monday(9) + chrono::Duration::days(5) + chrono::Duration::minutes(30));
        let report = preloader.run_cycle().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            ctx.cache.peek_local("catalog", "menu"),
            Some(json!({"fresh": "menu"}))
        );
        assert!(!loader
            .loaded
            .lock()
            .iter()
            .any(|(_, key)| key == "flash-sale"));
    }

    #[tokio::test]
    async fn test_preloader_handle_shutdown() {
        let mut config = Config::default();
        config.preloader.interval_secs = 3600;
        let (ctx, _) = context(config, Arc::new(ManualClock::new(monday(9))));

        let loader = Arc::new(RecordingLoader {
            loaded: Mutex::new(Vec::new()),
        });
        let handle = ctx.start_preloader(loader).unwrap();
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("preloader did not stop");
    }
}
