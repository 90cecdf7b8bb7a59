//! Multi-Level Adaptive Cache
//!
//! In-process L1 caches (one per namespace) in front of a remote key-value
//! tier (L2), with transparent compression and schema-versioned wire keys.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         MultiLevelCache                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 (per namespace)        │  Codec              │  L2 (remote tier)     │
//! │  ┌──────────────────────┐  │ ┌────────────────┐  │ ┌─────────────────┐   │
//! │  │ LocalCache           │  │ │ gzip / zlib    │  │ │ RemoteTier      │   │
//! │  │ LRU + lazy TTL       │  │ │ >= 1 KiB only  │  │ │ ns:version:key  │   │
//! │  │ uncompressed values  │  │ │ never expands  │  │ │ + timeout       │   │
//! │  └──────────────────────┘  │ └────────────────┘  │ └─────────────────┘   │
//! │            │               │         │           │          │            │
//! │            └───────────────┴─────────┴───────────┴──────────┘            │
//! │                                  │                                       │
//! │                 KeyVersionManager (envelope + migrations)                │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Degradation
//!
//! - Remote error or timeout: treated as an L2 miss; `set` reports `false`
//! - Corrupt payload: treated as a miss and counted
//! - Missing migrator: data served un-migrated with a warning
//! - L1 pressure: resolved by LRU eviction

pub mod compression;
mod coordinator;
mod entry;
mod local;
mod metrics;
mod namespace;
pub mod remote;
pub mod version;

#[cfg(test)]
mod proptest;

pub use compression::{
    CompressedEnvelope, CompressionAlgorithm, CompressionCodec, CompressionConfig, Compressor,
    ENVELOPE_MARKER,
};
pub use coordinator::{CacheConfig, CacheStats, MultiLevelCache, SetOptions};
pub use entry::{CacheEntry, CacheValue};
pub(crate) use entry::{clamp_ttl, ttl_from_secs};
pub use local::{LocalCache, LocalCacheConfig, LocalCacheStats};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use namespace::{NamespaceOverrides, NamespaceRegistry};
pub use remote::{glob_match, InMemoryRemoteTier, RemoteTier, RemoteTierStats};
pub use version::{KeyVersionManager, Migration, SchemaVersion, VersionEnvelope, VersionedKey};

/// Default L1 entries per namespace
pub const DEFAULT_L1_CAPACITY: usize = 1000;

/// Default L1 and L2 TTL (1 hour)
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Payloads smaller than this are never compressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Default deadline for a remote tier call
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 250;

/// Longest TTL honoured by either level (ten years); longer TTLs are clamped
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_L1_CAPACITY, 1000);
        assert_eq!(DEFAULT_TTL_SECS, 3600);
        assert_eq!(DEFAULT_COMPRESSION_THRESHOLD, 1024);
        assert_eq!(CacheConfig::default().remote_timeout_ms, DEFAULT_REMOTE_TIMEOUT_MS);
    }

    #[test]
    fn test_wire_key_format() {
        let key = VersionedKey::new("inventory", "sku:42", SchemaVersion::V2);
        assert_eq!(key.wire_key(), "inventory:v2:sku:42");
    }
}
