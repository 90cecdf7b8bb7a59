//! Multi-Level Cache Coordinator
//!
//! Orchestrates per-namespace L1 caches, the remote tier (L2), the compression
//! codec and the key version manager behind one `get`/`set`/`invalidate`
//! surface.
//!
//! Only misconfiguration ([`Error::UnknownNamespace`]) escapes this type.
//! Remote failures, timeouts, corrupt payloads and missing migrators are
//! logged, counted and degraded to a miss or to un-migrated data.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::compression::{CompressedEnvelope, CompressionCodec};
use super::entry::{estimate_size, CacheValue};
use super::local::{hit_rate, LocalCache, LocalCacheConfig};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::namespace::{NamespaceOverrides, NamespaceRegistry};
use super::remote::RemoteTier;
use super::version::{KeyVersionManager, SchemaVersion};
use crate::analytics::AccessAnalyzer;
use crate::clock::Clock;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 capacity for namespaces without an override
    pub default_capacity: usize,
    /// L1 TTL (seconds) for namespaces without an override
    pub default_ttl_secs: u64,
    /// Per-namespace overrides
    pub namespaces: HashMap<String, NamespaceOverrides>,
    /// Reject namespaces not listed in `namespaces`
    pub strict_namespaces: bool,
    /// Deadline for every remote tier call
    pub remote_timeout_ms: u64,
    /// Schema version written by this deployment
    pub current_version: SchemaVersion,
    /// Versions tried, in order, after a miss at the current version
    pub fallback_versions: Vec<SchemaVersion>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_capacity: super::DEFAULT_L1_CAPACITY,
            default_ttl_secs: super::DEFAULT_TTL_SECS,
            namespaces: HashMap::new(),
            strict_namespaces: false,
            remote_timeout_ms: super::DEFAULT_REMOTE_TIMEOUT_MS,
            current_version: SchemaVersion::V2,
            fallback_versions: vec![SchemaVersion::V1],
        }
    }
}

impl CacheConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    fn local_defaults(&self) -> LocalCacheConfig {
        LocalCacheConfig {
            capacity: self.default_capacity,
            default_ttl: super::ttl_from_secs(self.default_ttl_secs),
        }
    }
}

/// Per-call options for [`MultiLevelCache::set_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// TTL for both levels; the namespace default when unset
    pub ttl: Option<Duration>,
    /// Override the codec's `enabled` flag
    pub compress: Option<bool>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }
}

/// Cache statistics for one namespace or all of them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub memory_estimate_bytes: u64,
    pub entries: usize,
    /// Namespaces covered by these numbers
    pub namespaces: usize,
    /// Coordinator-wide per-level counters
    pub levels: MetricsSnapshot,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Multi-level cache: L1 per namespace in front of a remote tier
pub struct MultiLevelCache {
    namespaces: NamespaceRegistry,
    remote: Arc<dyn RemoteTier>,
    codec: CompressionCodec,
    versions: KeyVersionManager,
    analyzer: Arc<AccessAnalyzer>,
    metrics: CacheMetrics,
    remote_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl MultiLevelCache {
    /// Create a coordinator with the default compression codec
    pub fn new(
        config: CacheConfig,
        remote: Arc<dyn RemoteTier>,
        analyzer: Arc<AccessAnalyzer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            namespaces: NamespaceRegistry::new(
                config.local_defaults(),
                config.namespaces.clone(),
                config.strict_namespaces,
                clock.clone(),
            ),
            remote,
            codec: CompressionCodec::new(),
            versions: KeyVersionManager::new(
                config.current_version,
                config.fallback_versions.clone(),
            ),
            analyzer,
            metrics: CacheMetrics::new(),
            remote_timeout: config.remote_timeout(),
            clock,
        }
    }

    /// Replace the compression codec
    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Version manager, used to register migrations
    pub fn versions(&self) -> &KeyVersionManager {
        &self.versions
    }

    pub fn analyzer(&self) -> &Arc<AccessAnalyzer> {
        &self.analyzer
    }

    pub fn codec(&self) -> &CompressionCodec {
        &self.codec
    }

    pub fn remote(&self) -> &Arc<dyn RemoteTier> {
        &self.remote
    }

    /// L1 cache for `namespace`
    pub fn local(&self, namespace: &str) -> Result<Arc<LocalCache>> {
        self.namespaces.get_or_create(namespace)
    }

    /// Read L1 without recording an access or touching recency
    pub fn peek_local(&self, namespace: &str, key: &str) -> Option<CacheValue> {
        self.namespaces.get(namespace).and_then(|c| c.peek(key))
    }

    /// Namespaces instantiated so far
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.namespaces()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Look up a value: L1, then L2 at the current version, then each fallback
    /// version (writing a fallback hit back at the current version).
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheValue>> {
        let tracker = LatencyTracker::start();
        let local = self.namespaces.get_or_create(namespace)?;

        if let Some(value) = local.get(key) {
            self.metrics.record_l1_hit();
            self.finish_get(namespace, key, Some(&value), &tracker);
            return Ok(Some(value));
        }
        self.metrics.record_l1_miss();

        let current = self.versions.current_version();
        if let Some(value) = self.read_remote(namespace, key, current).await {
            self.metrics.record_l2_hit();
            local.set(key, value.clone());
            self.finish_get(namespace, key, Some(&value), &tracker);
            return Ok(Some(value));
        }

        for &fallback in self.versions.fallback_versions() {
            if let Some(value) = self.read_remote(namespace, key, fallback).await {
                self.metrics.record_fallback_hit();
                debug!(namespace, key, %fallback, "Fallback hit, writing back at {}", current);

                if self.write_remote(namespace, key, &value, None, None).await {
                    self.metrics.record_write_back();
                }
                local.set(key, value.clone());
                self.finish_get(namespace, key, Some(&value), &tracker);
                return Ok(Some(value));
            }
        }

        self.metrics.record_l2_miss();
        self.finish_get(namespace, key, None, &tracker);
        Ok(None)
    }

    /// Typed [`get`](Self::get); a value of the wrong shape is a miss
    pub async fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(namespace, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!(namespace, key, "Cached value has unexpected shape: {}", e);
                Ok(None)
            }
        }
    }

    /// Whether the key is in L1 or stored at the current version in L2
    pub async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        let local = self.namespaces.get_or_create(namespace)?;
        if local.contains(key) {
            return Ok(true);
        }
        let wire = self.versions.wire_key(namespace, key, self.versions.current_version());
        Ok(self
            .remote_call("get", &wire, self.remote.get(&wire))
            .await
            .flatten()
            .is_some())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Store a value with default options
    pub async fn set(&self, namespace: &str, key: &str, value: CacheValue) -> Result<bool> {
        self.set_with(namespace, key, value, SetOptions::default()).await
    }

    /// Store a value in L2 (versioned, possibly compressed) and L1 (as is).
    ///
    /// Returns whether the L2 write succeeded.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set_with(
        &self,
        namespace: &str,
        key: &str,
        value: CacheValue,
        options: SetOptions,
    ) -> Result<bool> {
        let local = self.namespaces.get_or_create(namespace)?;
        let ttl = options
            .ttl
            .map(super::clamp_ttl)
            .or_else(|| local.default_ttl().to_std().ok());

        let stored = self
            .write_remote(namespace, key, &value, ttl, options.compress)
            .await;
        self.metrics.record_set(stored);

        let local_ttl = ttl.and_then(|d| chrono::Duration::from_std(d).ok());
        local.set_with_ttl(key, value, local_ttl);
        Ok(stored)
    }

    /// Typed [`set`](Self::set)
    pub async fn set_as<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<bool> {
        match serde_json::to_value(value) {
            Ok(value) => self.set(namespace, key, value).await,
            Err(e) => {
                warn!(namespace, key, "Value could not be serialized: {}", e);
                self.metrics.record_set(false);
                Ok(false)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Delete a key from L1 and from L2 at every known version
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let local = self.namespaces.get_or_create(namespace)?;
        let deleted_local = local.delete(key);

        let outcomes = join_all(self.known_versions().into_iter().map(|version| async move {
            let wire = self.versions.wire_key(namespace, key, version);
            self.remote_call("delete", &wire, self.remote.delete(&wire))
                .await
                .unwrap_or(false)
        }))
        .await;
        Ok(deleted_local || outcomes.into_iter().any(|d| d))
    }

    /// Delete every key matching a glob pattern.
    ///
    /// The remote tier deletes by pattern at every known version; the whole L1
    /// namespace is cleared. Returns the number of remote keys removed.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, namespace: &str, pattern: &str) -> Result<u64> {
        let local = self.namespaces.get_or_create(namespace)?;

        let removed: u64 = join_all(self.known_versions().into_iter().map(|version| async move {
            let wire_pattern = self.versions.wire_key(namespace, pattern, version);
            self.remote_call(
                "delete_pattern",
                &wire_pattern,
                self.remote.delete_pattern(&wire_pattern),
            )
            .await
            .unwrap_or(0)
        }))
        .await
        .into_iter()
        .sum();

        local.clear();
        debug!(namespace, pattern, removed, "Invalidated pattern");
        Ok(removed)
    }

    /// Drop every key of a namespace from both levels
    pub async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        self.invalidate_pattern(namespace, "*").await
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Statistics for one namespace, or aggregated over all of them
    pub fn stats(&self, namespace: Option<&str>) -> Result<CacheStats> {
        let caches: Vec<Arc<LocalCache>> = match namespace {
            Some(ns) => {
                // rejects unknown namespaces in strict mode
                self.namespaces.config_for(ns)?;
                self.namespaces.get(ns).into_iter().collect()
            }
            None => self.namespaces.all().into_iter().map(|(_, c)| c).collect(),
        };

        let mut stats = CacheStats {
            namespaces: caches.len(),
            levels: self.metrics.snapshot(),
            ..Default::default()
        };
        for cache in caches {
            let s = cache.stats();
            stats.hits += s.hits;
            stats.misses += s.misses;
            stats.evictions += s.evictions;
            stats.expirations += s.expirations;
            stats.memory_estimate_bytes += s.size_bytes;
            stats.entries += s.entries;
        }
        stats.hit_rate = hit_rate(stats.hits, stats.misses);
        Ok(stats)
    }

    /// Coordinator-wide per-level counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Check the remote tier is reachable within the timeout
    pub async fn ping(&self) -> bool {
        self.remote_call("ping", "-", self.remote.ping())
            .await
            .is_some()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn known_versions(&self) -> Vec<SchemaVersion> {
        std::iter::once(self.versions.current_version())
            .chain(self.versions.fallback_versions().iter().copied())
            .collect()
    }

    fn finish_get(
        &self,
        namespace: &str,
        key: &str,
        value: Option<&CacheValue>,
        tracker: &LatencyTracker,
    ) {
        self.metrics.record_get_latency(tracker.elapsed());
        self.analyzer.record_access(
            namespace,
            key,
            value.is_some(),
            tracker.elapsed_ms(),
            value.map(estimate_size),
        );
    }

    /// Run a remote call under the timeout. Failures are logged and counted.
    async fn remote_call<T, F>(&self, operation: &str, wire_key: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.metrics.record_remote_error();
                warn!(key = wire_key, "Remote tier {} failed: {}", operation, e);
                None
            }
            Err(_) => {
                self.metrics.record_remote_timeout();
                let e = Error::RemoteTimeout {
                    operation: operation.to_string(),
                    timeout_ms: self.remote_timeout.as_millis() as u64,
                };
                warn!(key = wire_key, "{}", e);
                None
            }
        }
    }

    /// Fetch, unwrap, decompress and migrate the value stored at `version`
    async fn read_remote(
        &self,
        namespace: &str,
        key: &str,
        version: SchemaVersion,
    ) -> Option<CacheValue> {
        let wire = self.versions.wire_key(namespace, key, version);

        let tracker = LatencyTracker::start();
        let raw = self
            .remote_call("get", &wire, self.remote.get(&wire))
            .await
            .flatten();
        self.metrics.record_l2_read_latency(tracker.elapsed());
        let raw = raw?;

        let stored: CacheValue = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                self.metrics.record_corrupt_payload();
                warn!(key = %wire, "Remote payload is not valid JSON: {}", e);
                return None;
            }
        };

        let (payload, stored_version) = self.versions.unwrap(stored);
        let payload = self.decode_payload(payload, &wire)?;

        let current = self.versions.current_version();
        if stored_version == current {
            return Some(payload);
        }
        if self.versions.can_migrate(stored_version, current) {
            self.metrics.record_migration();
        }
        Some(self.versions.migrate(payload, stored_version, current))
    }

    /// Open a compressed envelope; anything that does not parse is a miss
    fn decode_payload(&self, payload: CacheValue, wire: &str) -> Option<CacheValue> {
        let Some(envelope) = CompressedEnvelope::from_value(&payload) else {
            return Some(payload);
        };

        let decoded = self
            .codec
            .open(&envelope)
            .and_then(|bytes| serde_json::from_slice::<CacheValue>(&bytes).map_err(Error::from));

        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.record_corrupt_payload();
                warn!(key = %wire, "Discarding corrupt compressed payload: {}", e);
                None
            }
        }
    }

    /// Serialize, optionally compress, wrap and store at the current version
    async fn write_remote(
        &self,
        namespace: &str,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
        compress: Option<bool>,
    ) -> bool {
        let wire = self
            .versions
            .wire_key(namespace, key, self.versions.current_version());

        let payload = match self.encode_payload(value, compress) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %wire, "Failed to encode value: {}", e);
                return false;
            }
        };

        let envelope = self.versions.wrap(payload, self.clock.now());
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(key = %wire, "Failed to encode version envelope: {}", e);
                return false;
            }
        };

        let ttl = ttl.or_else(|| {
            self.namespaces
                .get(namespace)
                .and_then(|c| c.default_ttl().to_std().ok())
        });
        self.remote_call("set", &wire, self.remote.set(&wire, bytes, ttl))
            .await
            .is_some()
    }

    fn encode_payload(&self, value: &CacheValue, compress: Option<bool>) -> Result<CacheValue> {
        if !compress.unwrap_or(self.codec.config().enabled) {
            return Ok(value.clone());
        }

        let serialized = serde_json::to_vec(value)?;
        match self.codec.seal(&serialized) {
            Some(envelope) => {
                self.metrics
                    .record_compressed_write(envelope.original_size, envelope.compressed_size);
                Ok(serde_json::to_value(envelope)?)
            }
            None => Ok(value.clone()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
