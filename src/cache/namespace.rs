//! Namespace Registry
//!
//! Each namespace owns its own [`LocalCache`]. Namespaces are created lazily
//! on first access and live for the rest of the process.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::local::{LocalCache, LocalCacheConfig};
use crate::clock::Clock;
use crate::error::{Error, Result};

/// Per-namespace overrides of the global L1 defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct NamespaceOverrides {
    /// Entry capacity for this namespace
    pub capacity: Option<usize>,
    /// Default TTL in seconds for this namespace
    pub ttl_secs: Option<u64>,
}

/// Lazily populated map of namespace -> L1 instance
pub struct NamespaceRegistry {
    caches: DashMap<String, Arc<LocalCache>>,
    defaults: LocalCacheConfig,
    overrides: HashMap<String, NamespaceOverrides>,
    strict: bool,
    clock: Arc<dyn Clock>,
}

impl NamespaceRegistry {
    /// Create a registry.
    ///
    /// With `strict` set, only namespaces present in `overrides` may be used.
    pub fn new(
        defaults: LocalCacheConfig,
        overrides: HashMap<String, NamespaceOverrides>,
        strict: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            caches: DashMap::new(),
            defaults,
            overrides,
            strict,
            clock,
        }
    }

    /// Get the L1 cache for `namespace`, creating it on first use
    pub fn get_or_create(&self, namespace: &str) -> Result<Arc<LocalCache>> {
        if let Some(cache) = self.caches.get(namespace) {
            return Ok(cache.clone());
        }

        let config = self.config_for(namespace)?;
        let cache = self
            .caches
            .entry(namespace.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    namespace,
                    capacity = config.capacity,
                    ttl_secs = config.default_ttl.num_seconds(),
                    "Creating namespace cache"
                );
                Arc::new(LocalCache::with_config(config, self.clock.clone()))
            })
            .clone();
        Ok(cache)
    }

    /// Get the L1 cache for `namespace` only if it already exists
    pub fn get(&self, namespace: &str) -> Option<Arc<LocalCache>> {
        self.caches.get(namespace).map(|c| c.clone())
    }

    /// Effective configuration for a namespace
    pub fn config_for(&self, namespace: &str) -> Result<LocalCacheConfig> {
        match self.overrides.get(namespace) {
            Some(o) => Ok(LocalCacheConfig {
                capacity: o.capacity.unwrap_or(self.defaults.capacity),
                default_ttl: o
                    .ttl_secs
                    .map(super::ttl_from_secs)
                    .unwrap_or(self.defaults.default_ttl),
            }),
            None if self.strict => Err(Error::UnknownNamespace(namespace.to_string())),
            None => Ok(self.defaults.clone()),
        }
    }

    /// Names of every namespace created so far, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Every instantiated namespace cache
    pub fn all(&self) -> Vec<(String, Arc<LocalCache>)> {
        self.caches
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Whether unknown namespaces are rejected
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}
