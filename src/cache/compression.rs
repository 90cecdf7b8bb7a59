//! Cache Compression Support
//!
//! Size-gated gzip/zlib compression with automatic fallback on failure.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::compression::{CompressionCodec, CompressionAlgorithm};
//!
//! let codec = CompressionCodec::new();
//!
//! let data = "Hello, this is test data that should compress well! ".repeat(40);
//! let (compressed, algorithm) = codec.compress(data.as_bytes());
//! assert_eq!(algorithm, CompressionAlgorithm::Gzip);
//!
//! let decompressed = codec.decompress(&compressed, algorithm);
//! assert_eq!(decompressed.as_ref(), data.as_bytes());
//! ```

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// gzip (DEFLATE with gzip framing)
    #[default]
    Gzip,
    /// zlib (DEFLATE with zlib framing)
    Zlib,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Zlib => "zlib",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "zlib" => Ok(Self::Zlib),
            other => Err(Error::Config(format!("unknown compression algorithm: {other}"))),
        }
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress values written to the remote tier
    pub enabled: bool,
    /// Default algorithm to use
    pub algorithm: CompressionAlgorithm,
    /// Compression level (0-9)
    pub level: u32,
    /// Minimum size to compress (smaller payloads are stored uncompressed)
    pub min_size_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::Gzip,
            level: 6,
            min_size_bytes: super::DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8], _level: u32) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// gzip compressor
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>> {
        let failed = |e: std::io::Error| Error::CompressionFailed {
            algorithm: "gzip".into(),
            reason: e.to_string(),
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder.write_all(data).map_err(failed)?;
        encoder.finish().map_err(failed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: "gzip".into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

/// zlib compressor
pub struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zlib
    }

    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>> {
        let failed = |e: std::io::Error| Error::CompressionFailed {
            algorithm: "zlib".into(),
            reason: e.to_string(),
        };
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder.write_all(data).map_err(failed)?;
        encoder.finish().map_err(failed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: "zlib".into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

// =============================================================================
// Compressed Envelope
// =============================================================================

/// Key reserved for the envelope marker.
///
/// A stored JSON object carrying this key set to `true`, together with the
/// remaining envelope fields, is read back as compressed data.
pub const ENVELOPE_MARKER: &str = "_tiercache_compressed";

/// Self-describing compressed payload as stored inside a version envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedEnvelope {
    /// Marker so readers can tell an envelope from a plain JSON object
    #[serde(rename = "_tiercache_compressed")]
    pub compressed: bool,
    /// Algorithm used
    pub algorithm: CompressionAlgorithm,
    /// Size before compression
    pub original_size: usize,
    /// Size after compression
    pub compressed_size: usize,
    /// Base64 of the compressed bytes
    pub payload: String,
}

impl CompressedEnvelope {
    /// Wrap raw compressed bytes
    pub fn new(algorithm: CompressionAlgorithm, raw: &[u8], original_size: usize) -> Self {
        Self {
            compressed: true,
            algorithm,
            original_size,
            compressed_size: raw.len(),
            payload: STANDARD.encode(raw),
        }
    }

    /// Decode the stored bytes
    pub fn raw_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: self.algorithm.to_string(),
                reason: format!("invalid base64 payload: {e}"),
            })
    }

    /// Detect an envelope inside an arbitrary JSON value
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let is_envelope = value
            .get(ENVELOPE_MARKER)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !is_envelope {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

// =============================================================================
// Compression Codec
// =============================================================================

/// Codec for compression operations with fallback support
pub struct CompressionCodec {
    config: CompressionConfig,
    noop: NoopCompressor,
    gzip: GzipCompressor,
    zlib: ZlibCompressor,
}

impl CompressionCodec {
    /// Create a new codec with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            config,
            noop: NoopCompressor,
            gzip: GzipCompressor,
            zlib: ZlibCompressor,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Gzip => &self.gzip,
            CompressionAlgorithm::Zlib => &self.zlib,
        }
    }

    /// True iff the payload clears the size threshold
    pub fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= self.config.min_size_bytes
    }

    /// Compress data using the configured algorithm and level
    ///
    /// Returns (compressed_data, algorithm_used).
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        self.compress_with(data, self.config.algorithm, self.config.level)
    }

    /// Compress with a specific algorithm and level.
    ///
    /// Falls back to the input with [`CompressionAlgorithm::None`] if the data
    /// is below threshold, compression fails, or the output is not strictly
    /// smaller than the input.
    pub fn compress_with(
        &self,
        data: &[u8],
        algorithm: CompressionAlgorithm,
        level: u32,
    ) -> (Bytes, CompressionAlgorithm) {
        if algorithm == CompressionAlgorithm::None || !self.should_compress(data) {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        match self.compressor(algorithm).compress(data, level) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), algorithm)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!("Compression with {} failed, using uncompressed: {}", algorithm, e);
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress data, returning the input unchanged on failure.
    ///
    /// Callers must validate the shape of what comes back.
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Bytes {
        match self.try_decompress(data, algorithm) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Decompression failed, returning raw bytes: {}", e);
                Bytes::copy_from_slice(data)
            }
        }
    }

    /// Decompress data, surfacing failures
    pub fn try_decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let decompressed = self.compressor(algorithm).decompress(data)?;
        Ok(Bytes::from(decompressed))
    }

    /// Compress a serialized payload into an envelope if it pays off
    pub fn seal(&self, data: &[u8]) -> Option<CompressedEnvelope> {
        let (bytes, algorithm) = self.compress(data);
        match algorithm {
            CompressionAlgorithm::None => None,
            _ => Some(CompressedEnvelope::new(algorithm, &bytes, data.len())),
        }
    }

    /// Recover the serialized payload from an envelope (fail-soft)
    pub fn open(&self, envelope: &CompressedEnvelope) -> Result<Bytes> {
        let raw = envelope.raw_bytes()?;
        Ok(self.decompress(&raw, envelope.algorithm))
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data() -> Vec<u8> {
        "Hello, this is test data that should compress well. "
            .repeat(50)
            .into_bytes()
    }

    #[test]
    fn test_gzip_roundtrip() {
        let compressor = GzipCompressor;
        let data = test_data();

        let compressed = compressor.compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_zlib_roundtrip() {
        let compressor = ZlibCompressor;
        let data = test_data();

        let compressed = compressor.compress(&data, 9).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_below_threshold_not_compressed() {
        let codec = CompressionCodec::new();
        let small = vec![b'a'; 500];

        assert!(!codec.should_compress(&small));
        let (result, algorithm) = codec.compress(&small);
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(result.as_ref(), small.as_slice());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let codec = CompressionCodec::new();
        assert!(codec.should_compress(&vec![0u8; 1024]));
        assert!(!codec.should_compress(&vec![0u8; 1023]));
    }

    #[test]
    fn test_incompressible_data_falls_back() {
        let codec = CompressionCodec::new();

        // xorshift noise does not deflate
        let mut state: u32 = 0x9E37_79B9;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        let (result, algorithm) = codec.compress(&noise);
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(result.as_ref(), noise.as_slice());
    }

    #[test]
    fn test_decompress_failure_returns_input() {
        let codec = CompressionCodec::new();
        let garbage = b"definitely not gzip";

        let out = codec.decompress(garbage, CompressionAlgorithm::Gzip);
        assert_eq!(out.as_ref(), garbage);
        assert!(codec
            .try_decompress(garbage, CompressionAlgorithm::Gzip)
            .is_err());
    }

    #[test]
    fn test_envelope_seal_open() {
        let codec = CompressionCodec::with_config(CompressionConfig {
            algorithm: CompressionAlgorithm::Zlib,
            ..Default::default()
        });
        let data = test_data();

        let envelope = codec.seal(&data).expect("repetitive data compresses");
        assert_eq!(envelope.algorithm, CompressionAlgorithm::Zlib);
        assert_eq!(envelope.original_size, data.len());
        assert!(envelope.compressed_size < envelope.original_size);

        let as_json = serde_json::to_value(&envelope).unwrap();
        let parsed = CompressedEnvelope::from_value(&as_json).unwrap();
        assert_eq!(codec.open(&parsed).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_plain_object_is_not_envelope() {
        let value = serde_json::json!({"algorithm": "gzip", "payload": "abc"});
        assert!(CompressedEnvelope::from_value(&value).is_none());

        let lookalike = serde_json::json!({
            "_compressed": true,
            "algorithm": "gzip",
            "original_size": 10,
            "compressed_size": 4,
            "payload": "bm90Z3ppcA=="
        });
        assert!(CompressedEnvelope::from_value(&lookalike).is_none());
    }

    #[test]
    fn test_envelope_carries_marker() {
        let envelope = CompressedEnvelope::new(CompressionAlgorithm::Gzip, b"xyz", 100);
        let as_json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(as_json[ENVELOPE_MARKER], serde_json::json!(true));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.name(), "none");
        assert_eq!(CompressionAlgorithm::Gzip.name(), "gzip");
        assert_eq!("ZLIB".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Zlib);
        assert!("lz4".parse::<CompressionAlgorithm>().is_err());
    }
}
