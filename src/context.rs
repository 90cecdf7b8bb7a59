//! Process-wide cache context
//!
//! Constructs the analyzer, coordinator and preloader once at startup and hands
//! them to call sites explicitly. Nothing in the crate is a global.

use std::sync::Arc;

use tracing::info;

use crate::analytics::{AccessAnalyzer, Preloader, PreloaderHandle, ValueLoader};
use crate::cache::{CompressionCodec, MultiLevelCache, RemoteTier};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;

/// Shared handles to the cache subsystem
#[derive(Clone)]
pub struct CacheContext {
    pub config: Arc<Config>,
    pub cache: Arc<MultiLevelCache>,
    pub analyzer: Arc<AccessAnalyzer>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext").finish_non_exhaustive()
    }
}

impl CacheContext {
    /// Validate `config` and build the subsystem over `remote`
    pub fn from_config(
        config: Config,
        remote: Arc<dyn RemoteTier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let analyzer = Arc::new(AccessAnalyzer::with_config(
            config.analyzer.clone(),
            clock.clone(),
        ));
        let cache = MultiLevelCache::new(
            config.cache.clone(),
            remote,
            analyzer.clone(),
            clock.clone(),
        )
        .with_codec(CompressionCodec::with_config(config.compression.clone()));

        info!(
            current_version = %config.cache.current_version,
            fallbacks = ?config.cache.fallback_versions,
            compression = %config.compression.algorithm,
            "Cache context initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            analyzer,
            clock,
        })
    }

    /// Build a preloader drawing from `loader`
    pub fn preloader(&self, loader: Arc<dyn ValueLoader>) -> Arc<Preloader> {
        Arc::new(Preloader::new(
            self.cache.clone(),
            loader,
            self.config.preloader.clone(),
            self.clock.clone(),
        ))
    }

    /// Start the preloader loop if enabled
    pub fn start_preloader(&self, loader: Arc<dyn ValueLoader>) -> Option<PreloaderHandle> {
        if !self.config.preloader.enabled {
            info!("Preloader disabled");
            return None;
        }
        Some(self.preloader(loader).start())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SeedFileLoader;
    use crate::cache::{CompressionAlgorithm, InMemoryRemoteTier};
    use crate::clock::ManualClock;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    #[test]
    fn test_from_config_applies_sections() {
        let config = Config::from_yaml_str("compression:\n  algorithm: zlib\n").unwrap();
        let ctx = CacheContext::from_config(
            config,
            Arc::new(InMemoryRemoteTier::new()),
            Arc::new(ManualClock::default()),
        )
        .unwrap();

        assert_eq!(ctx.cache.codec().config().algorithm, CompressionAlgorithm::Zlib);
        assert!(Arc::ptr_eq(ctx.cache.analyzer(), &ctx.analyzer));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.preloader.max_concurrent = 0;
        let result = CacheContext::from_config(
            config,
            Arc::new(InMemoryRemoteTier::new()),
            Arc::new(ManualClock::default()),
        );
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_disabled_preloader_not_started() {
        let mut config = Config::default();
        config.preloader.enabled = false;
        let ctx = CacheContext::from_config(
            config,
            Arc::new(InMemoryRemoteTier::new()),
            Arc::new(ManualClock::default()),
        )
        .unwrap();

        let loader = Arc::new(SeedFileLoader::from_map(HashMap::new()));
        assert!(ctx.start_preloader(loader).is_none());
    }
}
