//! tiercache - Multi-Level Adaptive Cache
//!
//! An in-process L1 cache per namespace layered in front of a remote
//! key-value tier, with transparent compression, schema-versioned wire keys
//! with migration, and an access-pattern analyzer that drives predictive
//! preloading.
//!
//! # Architecture
//!
//! ```text
//! get(ns, key) ─▶ L1 (LocalCache) ─miss─▶ L2 @ current ─miss─▶ L2 @ fallbacks
//!                     │                       │                    │
//!                     │                       ▼                    ▼
//!                     │              unwrap + decompress     migrate + write back
//!                     ▼
//!              AccessAnalyzer ──analyze──▶ Preloader ──set──▶ MultiLevelCache
//! ```
//!
//! # Modules
//!
//! - [`cache`] - L1, compression codec, key versioning, remote tier, coordinator
//! - [`analytics`] - Access pattern analyzer and preloader
//! - [`adapters`] - Seed-file value loader and Prometheus exporter
//! - [`config`] - YAML configuration
//! - [`context`] - Explicitly constructed process context
//! - [`clock`] - Injectable time source
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiercache::{CacheContext, Config, InMemoryRemoteTier, SystemClock};
//!
//! # async fn run() -> tiercache::Result<()> {
//! let ctx = CacheContext::from_config(
//!     Config::default(),
//!     Arc::new(InMemoryRemoteTier::new()),
//!     Arc::new(SystemClock),
//! )?;
//!
//! ctx.cache.set("users", "42", serde_json::json!({"name": "Ada"})).await?;
//! let user = ctx.cache.get("users", "42").await?;
//! assert!(user.is_some());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;

// Re-export commonly used types
pub use analytics::{AccessAnalyzer, PatternAnalysis, PatternType, Preloader, ValueLoader};
pub use cache::{
    CacheConfig, CacheStats, CacheValue, InMemoryRemoteTier, MultiLevelCache, RemoteTier,
    SchemaVersion, SetOptions,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::CacheContext;
pub use error::{Error, Result};
