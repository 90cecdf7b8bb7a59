//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache subsystem
///
/// Only [`Error::Config`] and [`Error::UnknownNamespace`] ever escape the
/// coordinator's public surface. Everything else is logged and degraded to a
/// miss (or to un-migrated data) at the point where it happens.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Namespace was never registered while strict namespaces are enabled
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Remote Tier Errors
    // =========================================================================
    /// Remote tier operation failed
    #[error("Remote tier error during {operation}: {reason}")]
    RemoteTier { operation: String, reason: String },

    /// Remote tier call exceeded its deadline
    #[error("Remote tier {operation} timed out after {timeout_ms}ms")]
    RemoteTimeout { operation: String, timeout_ms: u64 },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Versioning / Preload Errors
    // =========================================================================
    /// A registered migrator rejected the payload
    #[error("Migration {from} -> {to} failed: {reason}")]
    MigrationFailed {
        from: String,
        to: String,
        reason: String,
    },

    /// Value loader failed while preloading
    #[error("Loader failed for {namespace}:{key}: {reason}")]
    LoaderFailed {
        namespace: String,
        key: String,
        reason: String,
    },
}

impl Error {
    /// Whether this error must be surfaced to cache callers.
    ///
    /// Everything else degrades to a cache miss.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownNamespace(_))
    }
}
