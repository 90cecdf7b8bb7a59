//! Cache Metrics Collection
//!
//! Per-level counters for the coordinator. Per-namespace L1 counters live on
//! each [`LocalCache`](super::LocalCache); these cover what only the
//! coordinator can see (remote tier, fallbacks, migrations, compression).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Coordinator metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // L1
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,

    // L2
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    fallback_hits: AtomicU64,
    write_backs: AtomicU64,
    remote_errors: AtomicU64,
    remote_timeouts: AtomicU64,

    // Payload handling
    migrations: AtomicU64,
    corrupt_payloads: AtomicU64,
    compressed_writes: AtomicU64,
    bytes_saved: AtomicU64,

    // Writes
    sets: AtomicU64,
    set_failures: AtomicU64,

    // Latencies (microseconds, exponential moving average)
    get_latency_us: AtomicU64,
    l2_read_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_hit(&self) {
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_timeout(&self) {
        self.remote_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_payload(&self) {
        self.corrupt_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compressed_write(&self, original: usize, compressed: usize) {
        self.compressed_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved
            .fetch_add(original.saturating_sub(compressed) as u64, Ordering::Relaxed);
    }

    pub fn record_set(&self, ok: bool) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.set_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_get_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.get_latency_us, duration);
    }

    pub fn record_l2_read_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.l2_read_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn l2_misses(&self) -> u64 {
        self.l2_misses.load(Ordering::Relaxed)
    }

    /// Hits at any level over all lookups
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.l1_hits() + self.l2_hits() + self.fallback_hits.load(Ordering::Relaxed);
        // every lookup that reaches L2 and misses is a final miss
        let total = hits + self.l2_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1_hits: self.l1_hits(),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits(),
            l2_misses: self.l2_misses(),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            remote_timeouts: self.remote_timeouts.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            corrupt_payloads: self.corrupt_payloads.load(Ordering::Relaxed),
            compressed_writes: self.compressed_writes.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            get_latency: Duration::from_micros(self.get_latency_us.load(Ordering::Relaxed)),
            l2_read_latency: Duration::from_micros(
                self.l2_read_latency_us.load(Ordering::Relaxed),
            ),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

/// Snapshot of coordinator metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// L2 hits found only at a fallback version (not counted in `l2_hits`)
    pub fallback_hits: u64,
    /// Fallback hits re-written at the current version
    pub write_backs: u64,
    pub remote_errors: u64,
    pub remote_timeouts: u64,
    pub migrations: u64,
    /// Remote payloads that failed to deserialize
    pub corrupt_payloads: u64,
    pub compressed_writes: u64,
    pub bytes_saved: u64,
    pub sets: u64,
    pub set_failures: u64,
    pub get_latency: Duration,
    pub l2_read_latency: Duration,
    pub overall_hit_ratio: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in fractional milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

// =============================================================================
// Tests
// =============================================================================
