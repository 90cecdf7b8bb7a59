//! Preloader Scheduler
//!
//! Periodically asks the analyzer for high-priority keys and repopulates them
//! through the coordinator before they are requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::analytics::analyzer::{PatternAnalysis, PatternType};
use crate::cache::{CacheValue, MultiLevelCache};
use crate::clock::Clock;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Preloader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloaderConfig {
    /// Whether the background loop is started at all
    pub enabled: bool,
    /// Seconds between cycles
    pub interval_secs: u64,
    /// Minimum preload priority (1-10)
    pub priority_threshold: u8,
    /// Maximum concurrent loader calls
    pub max_concurrent: usize,
    /// Per-key loader deadline
    pub load_timeout_secs: u64,
    /// Optional deadline for a whole cycle
    pub cycle_timeout_secs: Option<u64>,
}

impl Default for PreloaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
            priority_threshold: 5,
            max_concurrent: 10,
            load_timeout_secs: 30,
            cycle_timeout_secs: None,
        }
    }
}

impl PreloaderConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Value Loader
// =============================================================================

/// Source of truth consulted when preloading a key
///
/// Implementations must be idempotent. `Ok(None)` means the source has no
/// value for the key and the preload is skipped.
#[async_trait]
pub trait ValueLoader: Send + Sync {
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheValue>>;
}

/// Whether a classified key should be preloaded during `hour` (UTC)
pub fn is_eligible(analysis: &PatternAnalysis, hour: u32) -> bool {
    match analysis.pattern_type {
        PatternType::Daily => analysis
            .peak_hours
            .iter()
            .any(|&peak| hour == (peak + 23) % 24),
        PatternType::Periodic | PatternType::Constant => true,
        PatternType::Burst => false,
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one preload cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    /// Keys at or above the priority threshold
    pub candidates: usize,
    /// Candidates eligible at this hour
    pub eligible: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Loader returned nothing
    pub skipped: usize,
}

enum Outcome {
    Loaded,
    Skipped,
    Failed,
}

/// Lifetime counters across cycles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloaderStats {
    pub cycles: u64,
    pub loaded: u64,
    pub failed: u64,
}

// =============================================================================
// Preloader
// =============================================================================

/// Predictive preloader
pub struct Preloader {
    cache: Arc<MultiLevelCache>,
    loader: Arc<dyn ValueLoader>,
    config: PreloaderConfig,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    cycles: AtomicU64,
    loaded: AtomicU64,
    failed: AtomicU64,
}

impl Preloader {
    pub fn new(
        cache: Arc<MultiLevelCache>,
        loader: Arc<dyn ValueLoader>,
        config: PreloaderConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            cache,
            loader,
            config,
            clock,
            semaphore: Arc::new(Semaphore::new(permits)),
            cycles: AtomicU64::new(0),
            loaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PreloaderConfig {
        &self.config
    }

    pub fn stats(&self) -> PreloaderStats {
        PreloaderStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            loaded: self.loaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Candidates for the current hour, highest priority first
    pub fn select_candidates(&self) -> (usize, Vec<PatternAnalysis>) {
        let hour = self.clock.now().hour();
        let threshold = self.config.priority_threshold;

        let candidates: Vec<PatternAnalysis> = self
            .cache
            .analyzer()
            .analyze_patterns()
            .into_iter()
            .filter(|a| a.preload_priority >= threshold)
            .collect();
        let total = candidates.len();

        let eligible = candidates
            .into_iter()
            .filter(|a| is_eligible(a, hour))
            .collect();
        (total, eligible)
    }

    /// Run one preload cycle
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> PreloadReport {
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let (candidates, eligible) = self.select_candidates();
        let mut report = PreloadReport {
            candidates,
            eligible: eligible.len(),
            ..Default::default()
        };

        if eligible.is_empty() {
            debug!(candidates, "No keys eligible for preload");
            return report;
        }

        let mut tasks = JoinSet::new();
        for analysis in eligible {
            let semaphore = Arc::clone(&self.semaphore);
            let cache = Arc::clone(&self.cache);
            let loader = Arc::clone(&self.loader);
            let load_timeout = self.config.load_timeout();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Outcome::Failed,
                };
                preload_one(&cache, loader.as_ref(), &analysis, load_timeout).await
            });
        }

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Outcome::Loaded) => report.succeeded += 1,
                    Ok(Outcome::Skipped) => report.skipped += 1,
                    Ok(Outcome::Failed) => report.failed += 1,
                    Err(e) => {
                        error!("Preload task panicked: {}", e);
                        report.failed += 1;
                    }
                }
            }
        };

        let timed_out = match self.config.cycle_timeout() {
            Some(limit) => tokio::time::timeout(limit, drain).await.is_err(),
            None => {
                drain.await;
                false
            }
        };

        if timed_out {
            let unfinished = tasks.len();
            tasks.abort_all();
            warn!(unfinished, "Preload cycle timed out");
            report.failed += unfinished;
        }

        self.loaded
            .fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        info!(
            candidates = report.candidates,
            eligible = report.eligible,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Preload cycle complete"
        );
        report
    }

    /// Start the periodic loop; the first cycle runs one interval from now
    pub fn start(self: Arc<Self>) -> PreloaderHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { self.run(child).await });
        PreloaderHandle { token, task }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.interval().max(Duration::from_millis(1));
        info!("Starting preloader with {:?}", self.config);

        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Preloader shutting down");
                    break;
                }
                _ = tick.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            info!("Preloader cancelled mid-cycle");
                            break;
                        }
                        _ = self.run_cycle() => {}
                    }
                }
            }
        }
    }
}

async fn preload_one(
    cache: &MultiLevelCache,
    loader: &dyn ValueLoader,
    analysis: &PatternAnalysis,
    load_timeout: Duration,
) -> Outcome {
    let (namespace, key) = (analysis.namespace.as_str(), analysis.key.as_str());

    let loaded = match tokio::time::timeout(load_timeout, loader.load(namespace, key)).await {
        Ok(result) => result,
        Err(_) => Err(Error::LoaderFailed {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: format!("timed out after {:?}", load_timeout),
        }),
    };

    match loaded {
        Ok(Some(value)) => match cache.set(namespace, key, value).await {
            Ok(true) => {
                debug!(namespace, key, "Preloaded key");
                Outcome::Loaded
            }
            Ok(false) => {
                warn!(namespace, key, "Preload write to remote tier failed");
                Outcome::Failed
            }
            Err(e) => {
                warn!(namespace, key, "Preload rejected: {}", e);
                Outcome::Failed
            }
        },
        Ok(None) => Outcome::Skipped,
        Err(e) => {
            warn!(namespace, key, "Preload load failed: {}", e);
            Outcome::Failed
        }
    }
}

/// Handle to a running preloader loop
pub struct PreloaderHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PreloaderHandle {
    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Preloader task ended abnormally: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
