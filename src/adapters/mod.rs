//! Infrastructure Adapters
//!
//! Implementations of the crate's seams against concrete infrastructure.
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  ValueLoader (preloader)     │◀─────│  SeedFileLoader (JSON file)  │
//! └──────────────────────────────┘      └──────────────────────────────┘
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  MultiLevelCache::stats      │─────▶│  PrometheusExporter          │
//! └──────────────────────────────┘      └──────────────────────────────┘
//! ```
//!
//! The remote tier adapter ([`InMemoryRemoteTier`](crate::cache::InMemoryRemoteTier))
//! lives beside its trait in [`cache::remote`](crate::cache::remote).

mod prometheus;
mod seed_loader;

pub use self::prometheus::PrometheusExporter;
pub use seed_loader::SeedFileLoader;
