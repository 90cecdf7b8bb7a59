//! Key Versioning and Schema Migration
//!
//! Every value written to the remote tier lives under a wire-key that encodes
//! its schema version, and is wrapped in a [`VersionEnvelope`] so a reader can
//! detect the version without a side channel.
//!
//! ```text
//! wire-key:  {namespace}:{version}:{base_key}
//! envelope:  {"_cache_version": "v2", "_cached_at": "...", "data": ...}
//! ```
//!
//! Migrations are registered per directly adjacent `(from, to)` pair. There is
//! no chaining through intermediate versions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::CacheValue;
use crate::error::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Schema version of a cached value
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    #[default]
    V2,
    V3,
}

impl SchemaVersion {
    /// Oldest known version; untagged data is assumed to be this
    pub const OLDEST: SchemaVersion = SchemaVersion::V1;

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
            SchemaVersion::V3 => "v3",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(SchemaVersion::V1),
            "v2" => Ok(SchemaVersion::V2),
            "v3" => Ok(SchemaVersion::V3),
            other => Err(Error::Config(format!("unknown schema version: {other}"))),
        }
    }
}

// =============================================================================
// Versioned Key
// =============================================================================

/// `(namespace, base_key, version)` triple addressing one remote entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey {
    pub namespace: String,
    pub base_key: String,
    pub version: SchemaVersion,
}

impl VersionedKey {
    pub fn new(
        namespace: impl Into<String>,
        base_key: impl Into<String>,
        version: SchemaVersion,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            base_key: base_key.into(),
            version,
        }
    }

    /// Deterministic wire-key
    pub fn wire_key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.version, self.base_key)
    }

    /// Parse a wire-key back into its parts.
    ///
    /// The base key may itself contain colons; namespace and version may not.
    pub fn parse(wire_key: &str) -> Option<Self> {
        let mut parts = wire_key.splitn(3, ':');
        let namespace = parts.next()?;
        let version = parts.next()?.parse().ok()?;
        let base_key = parts.next()?;
        Some(Self::new(namespace, base_key, version))
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_key())
    }
}

// =============================================================================
// Version Envelope
// =============================================================================

/// Version tag wrapped around every value written to the remote tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEnvelope {
    #[serde(rename = "_cache_version")]
    pub version: SchemaVersion,
    #[serde(rename = "_cached_at")]
    pub cached_at: DateTime<Utc>,
    #[serde(rename = "data")]
    pub payload: CacheValue,
}

// =============================================================================
// Migrations
// =============================================================================

/// Pure transformation of a payload between two schema versions
pub type MigrationFn = Arc<dyn Fn(CacheValue) -> Result<CacheValue> + Send + Sync>;

/// Migration registered for one `(from, to)` pair
#[derive(Clone)]
pub struct Migration {
    /// `from -> to`
    pub upgrade: MigrationFn,
    /// Optional inverse `to -> from`, used when only the reverse pair is registered
    pub downgrade: Option<MigrationFn>,
}

impl Migration {
    /// One-directional migration
    pub fn new<F>(upgrade: F) -> Self
    where
        F: Fn(CacheValue) -> Result<CacheValue> + Send + Sync + 'static,
    {
        Self {
            upgrade: Arc::new(upgrade),
            downgrade: None,
        }
    }

    /// Attach an inverse
    pub fn with_inverse<F>(mut self, downgrade: F) -> Self
    where
        F: Fn(CacheValue) -> Result<CacheValue> + Send + Sync + 'static,
    {
        self.downgrade = Some(Arc::new(downgrade));
        self
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("invertible", &self.downgrade.is_some())
            .finish()
    }
}

// =============================================================================
// Key Version Manager
// =============================================================================

/// Maps logical keys to versioned wire-keys and migrates payloads between versions
pub struct KeyVersionManager {
    current: SchemaVersion,
    fallbacks: Vec<SchemaVersion>,
    migrations: RwLock<HashMap<(SchemaVersion, SchemaVersion), Migration>>,
}

impl KeyVersionManager {
    /// Create a manager for `current`, trying `fallbacks` in the given order on miss
    pub fn new(current: SchemaVersion, fallbacks: Vec<SchemaVersion>) -> Self {
        let fallbacks = fallbacks.into_iter().filter(|v| *v != current).collect();
        Self {
            current,
            fallbacks,
            migrations: RwLock::new(HashMap::new()),
        }
    }

    /// Version new writes are stored under
    pub fn current_version(&self) -> SchemaVersion {
        self.current
    }

    /// Versions tried after a miss at the current version
    pub fn fallback_versions(&self) -> &[SchemaVersion] {
        &self.fallbacks
    }

    /// Register a migration for a `(from, to)` pair, replacing any previous one
    pub fn register(&self, from: SchemaVersion, to: SchemaVersion, migration: Migration) {
        debug!(%from, %to, "Registering migration");
        self.migrations.write().insert((from, to), migration);
    }

    /// Whether `migrate(from, to)` would transform anything
    pub fn can_migrate(&self, from: SchemaVersion, to: SchemaVersion) -> bool {
        if from == to {
            return true;
        }
        let migrations = self.migrations.read();
        migrations.contains_key(&(from, to))
            || migrations
                .get(&(to, from))
                .map(|m| m.downgrade.is_some())
                .unwrap_or(false)
    }

    /// Wire-key for `base_key` in `namespace` at `version`
    pub fn wire_key(&self, namespace: &str, base_key: &str, version: SchemaVersion) -> String {
        VersionedKey::new(namespace, base_key, version).wire_key()
    }

    /// Wrap a payload at the current version
    pub fn wrap(&self, payload: CacheValue, now: DateTime<Utc>) -> VersionEnvelope {
        self.wrap_as(payload, self.current, now)
    }

    /// Wrap a payload at an explicit version
    pub fn wrap_as(
        &self,
        payload: CacheValue,
        version: SchemaVersion,
        now: DateTime<Utc>,
    ) -> VersionEnvelope {
        VersionEnvelope {
            version,
            cached_at: now,
            payload,
        }
    }

    /// Split a stored object into payload and version.
    ///
    /// Objects without a version tag are treated as [`SchemaVersion::OLDEST`].
    pub fn unwrap(&self, stored: CacheValue) -> (CacheValue, SchemaVersion) {
        let tagged = stored
            .get("_cache_version")
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse::<SchemaVersion>().ok());

        match tagged {
            Some(version) => match stored {
                CacheValue::Object(mut map) => {
                    let payload = map.remove("data").unwrap_or(CacheValue::Null);
                    (payload, version)
                }
                other => (other, version),
            },
            None => (stored, SchemaVersion::OLDEST),
        }
    }

    /// Migrate a payload between versions.
    ///
    /// Uses the registered `(from, to)` migration, else the inverse of a
    /// registered `(to, from)` migration. With neither, or if the migration
    /// fails, the payload is returned unchanged and a warning is logged.
    pub fn migrate(&self, payload: CacheValue, from: SchemaVersion, to: SchemaVersion) -> CacheValue {
        if from == to {
            return payload;
        }

        let step = {
            let migrations = self.migrations.read();
            migrations
                .get(&(from, to))
                .map(|m| m.upgrade.clone())
                .or_else(|| migrations.get(&(to, from)).and_then(|m| m.downgrade.clone()))
        };

        let Some(step) = step else {
            warn!(%from, %to, "No migration registered, serving un-migrated data");
            return payload;
        };

        let original = payload.clone();
        match step(payload) {
            Ok(migrated) => {
                debug!(%from, %to, "Migrated cached payload");
                migrated
            }
            Err(e) => {
                warn!(%from, %to, error = %e, "Migration failed, serving un-migrated data");
                original
            }
        }
    }
}

impl Default for KeyVersionManager {
    fn default() -> Self {
        Self::new(SchemaVersion::V2, vec![SchemaVersion::V1])
    }
}

// =============================================================================
// Tests
// =============================================================================
