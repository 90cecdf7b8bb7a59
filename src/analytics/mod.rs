//! Access analytics and predictive preloading
//!
//! ```text
//! MultiLevelCache::get ──record──▶ AccessAnalyzer ──analyze──▶ Preloader
//!         ▲                                                       │
//!         └───────────────── set (ValueLoader result) ────────────┘
//! ```

pub mod analyzer;
pub mod preloader;

pub use analyzer::{AccessAnalyzer, AccessRecord, AnalyzerConfig, PatternAnalysis, PatternType};
pub use preloader::{
    is_eligible, PreloadReport, Preloader, PreloaderConfig, PreloaderHandle, PreloaderStats,
    ValueLoader,
};
