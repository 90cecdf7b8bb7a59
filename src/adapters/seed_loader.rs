//! Seed File Loader
//!
//! Implements [`ValueLoader`] over a JSON document of the form
//! `{"namespace": {"key": value, ...}, ...}`. The binary uses it as the
//! source of truth the preloader repopulates from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::analytics::ValueLoader;
use crate::cache::CacheValue;
use crate::error::{Error, Result};

type SeedMap = HashMap<String, HashMap<String, CacheValue>>;

/// File-backed value loader
pub struct SeedFileLoader {
    path: Option<PathBuf>,
    values: RwLock<SeedMap>,
}

impl std::fmt::Debug for SeedFileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedFileLoader").finish_non_exhaustive()
    }
}

impl SeedFileLoader {
    /// Read and parse a seed file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = parse(&std::fs::read(&path)?)?;
        info!(
            path = %path.display(),
            namespaces = values.len(),
            "Loaded seed file"
        );
        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Loader over an in-memory map
    pub fn from_map(values: SeedMap) -> Self {
        Self {
            path: None,
            values: RwLock::new(values),
        }
    }

    /// Re-read the backing file, returning the number of keys now known
    pub async fn reload(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };
        let values = parse(&tokio::fs::read(path).await?)?;
        *self.values.write() = values;
        Ok(self.len())
    }

    /// Total keys across namespaces
    pub fn len(&self) -> usize {
        self.values.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(namespace, key)` pair, sorted
    pub fn keys(&self) -> Vec<(String, String)> {
        let values = self.values.read();
        let mut keys: Vec<(String, String)> = values
            .iter()
            .flat_map(|(ns, entries)| entries.keys().map(move |k| (ns.clone(), k.clone())))
            .collect();
        keys.sort();
        keys
    }
}

fn parse(bytes: &[u8]) -> Result<SeedMap> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Config(format!("seed file must map namespace -> key -> value: {}", e)))
}

#[async_trait]
impl ValueLoader for SeedFileLoader {
    async fn load(&self, namespace: &str, key: &str) -> Result<Option<CacheValue>> {
        Ok(self
            .values
            .read()
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================
