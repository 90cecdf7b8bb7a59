//! L2 Cache - Remote Key-Value Tier
//!
//! The remote tier is an external addressable key-value service with TTL
//! support (Redis-like). The coordinator only talks to it through
//! [`RemoteTier`]; [`InMemoryRemoteTier`] is the bundled implementation used
//! by tests and single-process deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Remote tier client trait
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Fetch the raw bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store bytes under `key` with an optional TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern (`*`, `?`), returning the count
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Backend statistics
    fn stats(&self) -> RemoteTierStats;
}

/// Remote tier statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTierStats {
    /// Keys currently stored
    pub key_count: u64,
    /// Bytes currently stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// Redis-style glob match supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

struct StoredValue {
    data: Bytes,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory remote tier
///
/// Uses DashMap for sharded concurrent access; expiry is checked lazily on read.
pub struct InMemoryRemoteTier {
    storage: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryRemoteTier {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryRemoteTier {
    /// Create a new in-memory tier
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tier whose TTLs follow `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: DashMap::new(),
            clock,
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Whether `key` is present and unexpired
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.storage
            .get(key)
            .map(|v| v.expires_at.map(|at| now <= at).unwrap_or(true))
            .unwrap_or(false)
    }

    /// Snapshot of stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.storage.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.storage.remove(key) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let expired = match self.storage.get(key) {
            None => return Ok(None),
            Some(stored) => match stored.expires_at {
                Some(at) if now > at => true,
                _ => return Ok(Some(stored.data.clone())),
            },
        };

        // a concurrent set may have replaced the entry since the read guard dropped
        if expired {
            let removed = self
                .storage
                .remove_if(key, |_, v| v.expires_at.map_or(false, |at| now > at));
            if let Some((_, old)) = removed {
                self.total_bytes
                    .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| self.clock.now().checked_add_signed(d));
        let size = value.len() as u64;

        let old = self.storage.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at,
            },
        );

        if let Some(old) = old {
            self.total_bytes
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.remove_entry(key))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let matching: Vec<String> = self
            .storage
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> RemoteTierStats {
        RemoteTierStats {
            key_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
