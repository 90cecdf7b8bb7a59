//! Process configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.
//!
//! ```yaml
//! cache:
//!   default_capacity: 1000
//!   default_ttl_secs: 3600
//!   remote_timeout_ms: 250
//!   current_version: v2
//!   fallback_versions: [v1]
//!   namespaces:
//!     sessions: { capacity: 5000, ttl_secs: 900 }
//! compression:
//!   algorithm: gzip
//!   level: 6
//! preloader:
//!   interval_secs: 1800
//!   priority_threshold: 5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analytics::{AnalyzerConfig, PreloaderConfig};
use crate::cache::{CacheConfig, CompressionConfig, MAX_TTL_SECS};
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub compression: CompressionConfig,
    pub analyzer: AnalyzerConfig,
    pub preloader: PreloaderConfig,
}

impl Config {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if cache.default_capacity == 0 {
            return Err(Error::Config("cache.default_capacity must be > 0".into()));
        }
        if cache.default_ttl_secs == 0 || cache.default_ttl_secs > MAX_TTL_SECS {
            return Err(Error::Config(format!(
                "cache.default_ttl_secs must be in 1..={}",
                MAX_TTL_SECS
            )));
        }
        if cache.remote_timeout_ms == 0 {
            return Err(Error::Config("cache.remote_timeout_ms must be > 0".into()));
        }
        if cache.fallback_versions.contains(&cache.current_version) {
            return Err(Error::Config(format!(
                "cache.fallback_versions must not contain the current version {}",
                cache.current_version
            )));
        }
        for (name, overrides) in &cache.namespaces {
            if overrides.capacity == Some(0) {
                return Err(Error::Config(format!(
                    "cache.namespaces.{}.capacity must be > 0",
                    name
                )));
            }
            if matches!(overrides.ttl_secs, Some(s) if s == 0 || s > MAX_TTL_SECS) {
                return Err(Error::Config(format!(
                    "cache.namespaces.{}.ttl_secs must be in 1..={}",
                    name, MAX_TTL_SECS
                )));
            }
        }

        if self.compression.level > 9 {
            return Err(Error::Config("compression.level must be in 0..=9".into()));
        }

        if self.analyzer.retention_hours == 0 {
            return Err(Error::Config("analyzer.retention_hours must be > 0".into()));
        }
        if self.analyzer.prune_every == 0 {
            return Err(Error::Config("analyzer.prune_every must be > 0".into()));
        }

        let preloader = &self.preloader;
        if preloader.interval_secs == 0 {
            return Err(Error::Config("preloader.interval_secs must be > 0".into()));
        }
        if !(1..=10).contains(&preloader.priority_threshold) {
            return Err(Error::Config(
                "preloader.priority_threshold must be in 1..=10".into(),
            ));
        }
        if preloader.max_concurrent == 0 {
            return Err(Error::Config("preloader.max_concurrent must be > 0".into()));
        }
        if preloader.load_timeout_secs == 0 || preloader.cycle_timeout_secs == Some(0) {
            return Err(Error::Config("preloader timeouts must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
