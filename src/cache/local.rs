//! L1 Cache - In-Process Bounded LRU
//!
//! Fixed-capacity, TTL-aware least-recently-used cache for a single namespace.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` per namespace; unrelated namespaces never contend
//! - Recency kept as a monotonically increasing tick per key, indexed by a
//!   `BTreeMap<tick, key>` so the least recently used key is always the first
//!   entry of the index
//! - TTL checked lazily on access; capacity eviction bounds memory regardless
//!   of how many expired entries are still resident

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use super::entry::{CacheEntry, CacheValue};
use crate::clock::{Clock, SystemClock};

/// L1 cache configuration
#[derive(Debug, Clone)]
pub struct LocalCacheConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            capacity: super::DEFAULT_L1_CAPACITY,
            default_ttl: Duration::seconds(super::DEFAULT_TTL_SECS as i64),
        }
    }
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    size_bytes: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        self.size_bytes = self.size_bytes.saturating_sub(slot.entry.size_bytes());
        Some(slot.entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        if let Some(slot) = self.slots.remove(&key) {
            self.size_bytes = self.size_bytes.saturating_sub(slot.entry.size_bytes());
        }
        Some(key)
    }
}

/// L1 Cache - one namespace's in-process tier
pub struct LocalCache {
    inner: Mutex<Inner>,
    config: LocalCacheConfig,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache").finish_non_exhaustive()
    }
}

impl LocalCache {
    /// Create a new L1 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(LocalCacheConfig::default(), Arc::new(SystemClock))
    }

    /// Create a new L1 cache with custom configuration and time source
    pub fn with_config(mut config: LocalCacheConfig, clock: Arc<dyn Clock>) -> Self {
        config.capacity = config.capacity.max(1);
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a value, promoting it to most-recently-used.
    ///
    /// An expired entry is removed and counted as both an expiration and a miss.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = match inner.slots.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let tick = inner.bump();
        let (old_tick, value) = match inner.slots.get_mut(key) {
            Some(slot) => {
                let old = slot.tick;
                slot.tick = tick;
                (old, slot.entry.value().clone())
            }
            None => return None,
        };
        inner.order.remove(&old_tick);
        inner.order.insert(tick, key.to_string());

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Insert or replace a value with the default TTL
    pub fn set(&self, key: impl Into<String>, value: CacheValue) {
        self.set_with_ttl(key, value, None);
    }

    /// Insert or replace a value.
    ///
    /// Inserting a new key into a full cache evicts the least-recently-used entry first.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: CacheValue, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry::new(value, self.clock.now(), ttl);

        let mut inner = self.inner.lock();

        if inner.remove(&key).is_none() {
            while inner.slots.len() >= self.config.capacity {
                match inner.evict_lru() {
                    Some(evicted) => {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(key = %evicted, "L1 eviction");
                    }
                    None => break,
                }
            }
        }

        let tick = inner.bump();
        inner.size_bytes += entry.size_bytes();
        inner.order.insert(tick, key.clone());
        inner.slots.insert(key, Slot { entry, tick });
    }

    /// Remove an entry, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Check presence without touching recency or counters
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .slots
            .get(key)
            .map(|slot| !slot.entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Read a live value without touching recency or counters
    pub fn peek(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now();
        self.inner
            .lock()
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.value().clone())
    }

    /// Keys ordered from least to most recently used
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.values().cloned().collect()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.order.clear();
        inner.size_bytes = 0;
    }

    /// Get number of entries (expired entries included until touched)
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Default TTL for this namespace
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Approximate memory held by values
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    /// Get cache statistics
    pub fn stats(&self) -> LocalCacheStats {
        let (entries, size_bytes) = {
            let inner = self.inner.lock();
            (inner.slots.len(), inner.size_bytes)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        LocalCacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            capacity: self.config.capacity,
            entries,
            size_bytes,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// L1 cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalCacheStats {
    /// Hit count
    pub hits: u64,
    /// Miss count (expirations included)
    pub misses: u64,
    /// Capacity evictions
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Maximum entries
    pub capacity: usize,
    /// Current entries
    pub entries: usize,
    /// Approximate bytes held
    pub size_bytes: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_rate: f64,
}

// =============================================================================
// Tests
// =============================================================================
