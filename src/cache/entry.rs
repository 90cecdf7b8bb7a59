//! Cache Entry Types
//!
//! Values held by the in-process tier and the bookkeeping that travels with them.

use chrono::{DateTime, Duration, Utc};

use super::MAX_TTL_SECS;

/// A cached value.
///
/// JSON is the explicit sum type at the serialization edge; typed callers
/// convert through `serde` at the coordinator boundary.
pub type CacheValue = serde_json::Value;

/// Entry owned by a single [`LocalCache`](super::LocalCache)
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stored value (never compressed)
    value: CacheValue,
    /// When the entry stops being served
    expires_at: DateTime<Utc>,
    /// Approximate in-memory footprint in bytes
    size_bytes: u64,
}

impl CacheEntry {
    /// Create an entry written at `now` that lives for `ttl`.
    ///
    /// A TTL past the end of representable time never expires.
    pub fn new(value: CacheValue, now: DateTime<Utc>, ttl: Duration) -> Self {
        let size_bytes = estimate_size(&value);
        Self {
            value,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            size_bytes,
        }
    }

    /// Borrow the stored value
    #[inline]
    pub fn value(&self) -> &CacheValue {
        &self.value
    }

    /// Expiry time
    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Estimated footprint
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// An entry is expired strictly after its expiry instant
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Rough byte footprint of a JSON value, used for the memory estimate.
/// Whole-second TTL clamped to [`MAX_TTL_SECS`]
pub(crate) fn ttl_from_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

/// Caller-supplied TTL clamped to [`MAX_TTL_SECS`]
pub(crate) fn clamp_ttl(ttl: std::time::Duration) -> std::time::Duration {
    ttl.min(std::time::Duration::from_secs(MAX_TTL_SECS))
}

pub(crate) fn estimate_size(value: &CacheValue) -> u64 {
    match value {
        CacheValue::Null => 4,
        CacheValue::Bool(_) => 5,
        CacheValue::Number(_) => 8,
        CacheValue::String(s) => s.len() as u64 + 2,
        CacheValue::Array(items) => 2 + items.iter().map(estimate_size).sum::<u64>(),
        CacheValue::Object(map) => {
            2 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + 3 + estimate_size(v))
                .sum::<u64>()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
