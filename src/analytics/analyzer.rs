//! Access Pattern Analyzer
//!
//! Records every cache access and classifies per-key behaviour so the
//! preloader can warm keys ahead of predicted demand.
//!
//! # Classification
//!
//! For each `(namespace, key)` with enough history inside the retention window:
//!
//! 1. Inter-arrival coefficient of variation `cv < 0.3` -> `periodic`
//! 2. At most 6 hot hours-of-day holding at least 30% of accesses -> `daily`
//! 3. `cv > 1.5` -> `burst`
//! 4. otherwise -> `constant`

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

const HOURS_PER_DAY: usize = 24;
const PERIODIC_CV: f64 = 0.3;
const BURST_CV: f64 = 1.5;
const DAILY_MAX_HOURS: usize = 6;
const DAILY_MIN_SHARE: f64 = 0.3;
const PEAK_HOUR_COUNT: usize = 3;

// =============================================================================
// Configuration
// =============================================================================

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// How long access records are kept
    pub retention_hours: u64,
    /// Minimum records before a key is classified
    pub min_access_count: usize,
    /// Prune the history every this many records
    pub prune_every: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            retention_hours: 7 * 24,
            min_access_count: 10,
            prune_every: 1000,
        }
    }
}

impl AnalyzerConfig {
    fn retention(&self) -> Duration {
        Duration::hours(self.retention_hours as i64)
    }
}

// =============================================================================
// Records and Results
// =============================================================================

/// One cache access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub namespace: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub hit: bool,
    pub latency_ms: f64,
    pub size_bytes: Option<u64>,
}

/// Access pattern category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Concentrated in a few hours of the day
    Daily,
    /// Regular inter-arrival times
    Periodic,
    /// Highly irregular, clustered accesses
    Burst,
    /// Steady background traffic
    Constant,
}

impl PatternType {
    /// Priority bonus awarded to this category
    pub fn priority_bonus(&self) -> f64 {
        match self {
            PatternType::Daily => 2.0,
            PatternType::Periodic => 1.5,
            PatternType::Constant => 1.0,
            PatternType::Burst => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Daily => "daily",
            PatternType::Periodic => "periodic",
            PatternType::Burst => "burst",
            PatternType::Constant => "constant",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one key's access history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub namespace: String,
    pub key: String,
    pub pattern_type: PatternType,
    pub access_count: usize,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    /// Up to three busiest hours-of-day (UTC), ascending
    pub peak_hours: Vec<u32>,
    /// 0.0 (uniform over the day) to 1.0 (single hour)
    pub predictability: f64,
    /// 1 (lowest) to 10 (highest)
    pub preload_priority: u8,
}

// =============================================================================
// Analyzer
// =============================================================================

struct History {
    records: Vec<AccessRecord>,
    since_prune: usize,
}

/// Access history plus pattern classification
pub struct AccessAnalyzer {
    history: Mutex<History>,
    config: AnalyzerConfig,
    clock: Arc<dyn Clock>,
}

impl AccessAnalyzer {
    /// Create an analyzer with default configuration
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default(), Arc::new(SystemClock))
    }

    /// Create an analyzer with custom configuration and time source
    pub fn with_config(config: AnalyzerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            history: Mutex::new(History {
                records: Vec::new(),
                since_prune: 0,
            }),
            config,
            clock,
        }
    }

    /// Append an access record, pruning old history every `prune_every` records
    pub fn record_access(
        &self,
        namespace: &str,
        key: &str,
        hit: bool,
        latency_ms: f64,
        size_bytes: Option<u64>,
    ) {
        let now = self.clock.now();
        self.push(AccessRecord {
            namespace: namespace.to_string(),
            key: key.to_string(),
            timestamp: now,
            hit,
            latency_ms,
            size_bytes,
        });
    }

    /// Append a pre-built record (timestamps supplied by the caller)
    pub fn push(&self, record: AccessRecord) {
        let cutoff = self.clock.now() - self.config.retention();
        let mut history = self.history.lock();
        history.records.push(record);
        history.since_prune += 1;

        if history.since_prune >= self.config.prune_every.max(1) {
            history.since_prune = 0;
            let before = history.records.len();
            history.records.retain(|r| r.timestamp >= cutoff);
            let pruned = before - history.records.len();
            if pruned > 0 {
                debug!(pruned, "Pruned access history");
            }
        }
    }

    /// Drop records older than the retention window now, returning how many
    pub fn prune_now(&self) -> usize {
        let cutoff = self.clock.now() - self.config.retention();
        let mut history = self.history.lock();
        let before = history.records.len();
        history.records.retain(|r| r.timestamp >= cutoff);
        history.since_prune = 0;
        before - history.records.len()
    }

    /// Number of records currently held
    pub fn record_count(&self) -> usize {
        self.history.lock().records.len()
    }

    /// Forget all history
    pub fn clear(&self) {
        let mut history = self.history.lock();
        history.records.clear();
        history.since_prune = 0;
    }

    /// Classify every key with enough history, highest preload priority first
    pub fn analyze_patterns(&self) -> Vec<PatternAnalysis> {
        let groups = self.grouped_window();

        let mut results: Vec<PatternAnalysis> = groups
            .into_iter()
            .filter(|(_, records)| records.len() >= self.config.min_access_count.max(1))
            .map(|((namespace, key), records)| analyze_group(namespace, key, &records))
            .collect();

        results.sort_by(|a, b| {
            b.preload_priority
                .cmp(&a.preload_priority)
                .then(b.access_count.cmp(&a.access_count))
                .then_with(|| a.namespace.cmp(&b.namespace))
                .then_with(|| a.key.cmp(&b.key))
        });
        results
    }

    /// Classify a single key regardless of the minimum access count
    pub fn key_summary(&self, namespace: &str, key: &str) -> Option<PatternAnalysis> {
        let cutoff = self.clock.now() - self.config.retention();
        let records: Vec<AccessRecord> = self
            .history
            .lock()
            .records
            .iter()
            .filter(|r| r.namespace == namespace && r.key == key && r.timestamp >= cutoff)
            .cloned()
            .collect();

        if records.is_empty() {
            return None;
        }
        Some(analyze_group(namespace.to_string(), key.to_string(), &records))
    }

    /// Records inside the retention window grouped per key.
    ///
    /// The lock is only held while copying; classification runs unlocked.
    fn grouped_window(&self) -> BTreeMap<(String, String), Vec<AccessRecord>> {
        let cutoff = self.clock.now() - self.config.retention();
        let snapshot: Vec<AccessRecord> = {
            let history = self.history.lock();
            history
                .records
                .iter()
                .filter(|r| r.timestamp >= cutoff)
                .cloned()
                .collect()
        };

        let mut groups: BTreeMap<(String, String), Vec<AccessRecord>> = BTreeMap::new();
        for record in snapshot {
            groups
                .entry((record.namespace.clone(), record.key.clone()))
                .or_default()
                .push(record);
        }
        groups
    }
}

impl Default for AccessAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

fn analyze_group(namespace: String, key: String, records: &[AccessRecord]) -> PatternAnalysis {
    let count = records.len();

    let mut timestamps: Vec<DateTime<Utc>> = records.iter().map(|r| r.timestamp).collect();
    timestamps.sort();

    let mut hourly = [0u64; HOURS_PER_DAY];
    for ts in &timestamps {
        hourly[ts.hour() as usize] += 1;
    }

    let cv = interval_cv(&timestamps);
    let pattern_type = classify(cv, &hourly, count);
    let peak_hours = peak_hours(&hourly);
    let predictability = predictability(&hourly, count);

    let avg_latency_ms = records.iter().map(|r| r.latency_ms).sum::<f64>() / count as f64;
    let hits = records.iter().filter(|r| r.hit).count();

    PatternAnalysis {
        namespace,
        key,
        pattern_type,
        access_count: count,
        hit_rate: hits as f64 / count as f64,
        avg_latency_ms,
        peak_hours,
        predictability,
        preload_priority: preload_priority(count, avg_latency_ms, predictability, pattern_type),
    }
}

/// Coefficient of variation of inter-arrival times (seconds).
///
/// Fewer than two intervals give no evidence of regularity; a zero mean
/// interval (everything at one instant) is as irregular as it gets.
pub(crate) fn interval_cv(sorted: &[DateTime<Utc>]) -> f64 {
    if sorted.len() < 3 {
        return f64::INFINITY;
    }

    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
        .collect();

    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean <= 0.0 {
        return f64::INFINITY;
    }

    let variance =
        intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    variance.sqrt() / mean
}

pub(crate) fn classify(cv: f64, hourly: &[u64; HOURS_PER_DAY], total: usize) -> PatternType {
    if cv < PERIODIC_CV {
        return PatternType::Periodic;
    }
    if is_daily(hourly, total) {
        return PatternType::Daily;
    }
    if cv > BURST_CV {
        return PatternType::Burst;
    }
    PatternType::Constant
}

/// Hot hours are those with at least twice the uniform expectation.
fn is_daily(hourly: &[u64; HOURS_PER_DAY], total: usize) -> bool {
    if total == 0 {
        return false;
    }
    let uniform = total as f64 / HOURS_PER_DAY as f64;
    let hot: Vec<u64> = hourly
        .iter()
        .copied()
        .filter(|&c| c > 0 && c as f64 >= 2.0 * uniform)
        .collect();

    let share = hot.iter().sum::<u64>() as f64 / total as f64;
    !hot.is_empty() && hot.len() <= DAILY_MAX_HOURS && share >= DAILY_MIN_SHARE
}

/// Top three hours by count, ascending
pub(crate) fn peak_hours(hourly: &[u64; HOURS_PER_DAY]) -> Vec<u32> {
    let mut ranked: Vec<(u32, u64)> = hourly
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(h, &c)| (h as u32, c))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut peaks: Vec<u32> = ranked
        .into_iter()
        .take(PEAK_HOUR_COUNT)
        .map(|(h, _)| h)
        .collect();
    peaks.sort_unstable();
    peaks
}

/// `1 - H / H_max` over the hour-of-day distribution, clamped to [0, 1]
pub(crate) fn predictability(hourly: &[u64; HOURS_PER_DAY], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let entropy: f64 = hourly
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (HOURS_PER_DAY as f64).log2();
    (1.0 - entropy / max_entropy).clamp(0.0, 1.0)
}

pub(crate) fn preload_priority(
    count: usize,
    avg_latency_ms: f64,
    predictability: f64,
    pattern: PatternType,
) -> u8 {
    let frequency = (count as f64 / 100.0).min(1.0) * 3.0;
    let latency = (avg_latency_ms / 100.0).clamp(0.0, 1.0) * 3.0;
    let score = frequency + latency + predictability * 2.0 + pattern.priority_bonus();
    score.clamp(1.0, 10.0) as u8
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()
    }

    fn analyzer_at(now: DateTime<Utc>) -> (AccessAnalyzer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        (
            AccessAnalyzer::with_config(AnalyzerConfig::default(), clock.clone()),
            clock,
        )
    }

    fn record(ns: &str, key: &str, at: DateTime<Utc>, latency_ms: f64) -> AccessRecord {
        AccessRecord {
            namespace: ns.into(),
            key: key.into(),
            timestamp: at,
            hit: true,
            latency_ms,
            size_bytes: None,
        }
    }

    #[test]
    fn test_periodic_trace() {
        let (analyzer, _) = analyzer_at(start() + Duration::days(1));
        // every 15 minutes for 12 hours, small jitter
        for i in 0..48 {
            let jitter = if i % 2 == 0 { 10 } else { -10 };
            let at = start() + Duration::minutes(15 * i) + Duration::seconds(jitter);
            analyzer.push(record("n", "periodic", at, 5.0));
        }

        let results = analyzer.analyze_patterns();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pattern_type, PatternType::Periodic);
        assert_eq!(results[0].access_count, 48);
    }

    #[test]
    fn test_daily_trace() {
        let now = start() + Duration::days(6);
        let (analyzer, _) = analyzer_at(now);
        // two hours per day (09:xx and 14:xx) at irregular offsets
        for day in 0..5 {
            let base = start() + Duration::days(day);
            for (h, m) in [(9, 0), (9, 5), (9, 40), (14, 10), (14, 12)] {
                let at = base + Duration::hours(h) + Duration::minutes(m);
                analyzer.push(record("n", "daily", at, 20.0));
            }
        }

        let analysis = analyzer.key_summary("n", "daily").unwrap();
        assert_eq!(analysis.pattern_type, PatternType::Daily);
        assert_eq!(analysis.peak_hours, vec![9, 14]);
        assert!(analysis.predictability > 0.7);
    }

    #[test]
    fn test_burst_trace() {
        let (analyzer, _) = analyzer_at(start() + Duration::days(3));
        // tight clusters separated by long gaps, spread over many hours
        let mut at = start();
        for cluster in 0..12 {
            for _ in 0..5 {
                analyzer.push(record("n", "burst", at, 1.0));
                at += Duration::seconds(1);
            }
            at += Duration::hours(if cluster % 3 == 0 { 7 } else { 2 });
        }

        let analysis = analyzer.key_summary("n", "burst").unwrap();
        assert_eq!(analysis.pattern_type, PatternType::Burst);
    }

    #[test]
    fn test_min_access_count_filters() {
        let (analyzer, _) = analyzer_at(start() + Duration::hours(1));
        for i in 0..9 {
            analyzer.push(record("n", "rare", start() + Duration::minutes(i), 1.0));
        }
        assert!(analyzer.analyze_patterns().is_empty());
        assert!(analyzer.key_summary("n", "rare").is_some());
    }

    #[test]
    fn test_results_sorted_by_priority() {
        let (analyzer, _) = analyzer_at(start() + Duration::days(1));
        for i in 0..100 {
            analyzer.push(record("n", "hot", start() + Duration::minutes(5 * i), 150.0));
        }
        for i in 0..10 {
            analyzer.push(record("n", "cold", start() + Duration::minutes(37 * i * i), 0.5));
        }

        let results = analyzer.analyze_patterns();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "hot");
        assert!(results[0].preload_priority >= results[1].preload_priority);
    }

    #[test]
    fn test_retention_pruning() {
        let now = start() + Duration::days(10);
        let clock = Arc::new(ManualClock::new(now));
        let analyzer = AccessAnalyzer::with_config(
            AnalyzerConfig {
                prune_every: 5,
                ..Default::default()
            },
            clock,
        );

        for i in 0..4 {
            analyzer.push(record("n", "old", start() + Duration::minutes(i), 1.0));
        }
        assert_eq!(analyzer.record_count(), 4);

        // fifth record triggers the prune
        analyzer.record_access("n", "new", true, 1.0, Some(10));
        assert_eq!(analyzer.record_count(), 1);
    }

    #[test]
    fn test_prune_now_and_clear() {
        let (analyzer, clock) = analyzer_at(start());
        analyzer.record_access("n", "k", false, 2.0, None);
        clock.advance(Duration::days(8));
        analyzer.record_access("n", "k", true, 2.0, None);

        assert_eq!(analyzer.prune_now(), 1);
        assert_eq!(analyzer.record_count(), 1);

        analyzer.clear();
        assert_eq!(analyzer.record_count(), 0);
    }

    #[test]
    fn test_predictability_bounds() {
        let mut uniform = [0u64; HOURS_PER_DAY];
        uniform.iter_mut().for_each(|c| *c = 10);
        assert!(predictability(&uniform, 240) < 1e-9);

        let mut single = [0u64; HOURS_PER_DAY];
        single[3] = 50;
        assert!((predictability(&single, 50) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_peak_hours_ascending() {
        let mut hourly = [0u64; HOURS_PER_DAY];
        hourly[22] = 10;
        hourly[3] = 8;
        hourly[12] = 9;
        hourly[1] = 1;
        assert_eq!(peak_hours(&hourly), vec![3, 12, 22]);
    }

    #[test]
    fn test_priority_weights() {
        // 3 + 3 + 2 + 2 = 10
        assert_eq!(preload_priority(500, 500.0, 1.0, PatternType::Daily), 10);
        // 0.3 + 0.03 + 0 + 0.5 -> clamped to 1
        assert_eq!(preload_priority(10, 1.0, 0.0, PatternType::Burst), 1);
        // 3 + 0 + 1 + 1.5 = 5.5 -> 5
        assert_eq!(preload_priority(100, 0.0, 0.5, PatternType::Periodic), 5);
    }

    #[test]
    fn test_hit_rate_and_latency() {
        let (analyzer, _) = analyzer_at(start() + Duration::hours(2));
        for i in 0..10 {
            let mut r = record("n", "k", start() + Duration::minutes(i * 3), 10.0 * i as f64);
            r.hit = i % 2 == 0;
            analyzer.push(r);
        }
        let a = analyzer.key_summary("n", "k").unwrap();
        assert!((a.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!((a.avg_latency_ms - 45.0).abs() < 1e-9);
    }
}
