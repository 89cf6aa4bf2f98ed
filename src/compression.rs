// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload compression for cached entries.
//!
//! The cache manager talks to a [`CompressionCodec`]; the payload it stores
//! is the base64 text of the compressed JSON so that cache records remain
//! plain JSON objects.
//!
//! # Example
//!
//! ```
//! use offline_sync::compression::{CompressionCodec, ZstdCodec, compress_text, decompress_text};
//!
//! let codec = ZstdCodec::default();
//! let stored = compress_text(&codec, r#"{"operations":[1,2,3]}"#).unwrap();
//! assert_eq!(decompress_text(&codec, &stored).unwrap(), r#"{"operations":[1,2,3]}"#);
//! ```

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Zstd magic bytes (little-endian): 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default zstd level (3 is a good balance of speed/ratio)
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    /// Stored payload is not valid base64 / UTF-8
    #[error("payload encoding invalid: {0}")]
    Encoding(String),
}

/// Byte-level compression transform.
pub trait CompressionCodec: Send + Sync {
    /// Short name for logs and metrics ("zstd", "gzip").
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Zstd through the streaming encoder.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// Level 1-22. Higher levels compress better but slower.
    #[must_use]
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::with_level(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = zstd::Encoder::new(Vec::new(), self.level)
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))?;
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !is_zstd(data) {
            return Err(CompressionError::DecompressFailed("missing zstd frame header".into()));
        }
        let mut decoder = zstd::Decoder::new(data)
            .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
        Ok(output)
    }
}

/// Gzip, the format browser compression streams produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
        Ok(output)
    }
}

/// Check if data is zstd-compressed by checking magic bytes.
#[inline]
#[must_use]
pub fn is_zstd(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress `text` and return it base64-encoded.
pub fn compress_text(codec: &dyn CompressionCodec, text: &str) -> Result<String, CompressionError> {
    let compressed = codec.compress(text.as_bytes())?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`compress_text`].
pub fn decompress_text(codec: &dyn CompressionCodec, stored: &str) -> Result<String, CompressionError> {
    let compressed = STANDARD
        .decode(stored)
        .map_err(|e| CompressionError::Encoding(e.to_string()))?;
    let raw = codec.decompress(&compressed)?;
    String::from_utf8(raw).map_err(|e| CompressionError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> String {
        json!({
            "vendors": (0..50).map(|i| json!({
                "id": i,
                "name": format!("Vendor {}", i),
                "status": "active",
            })).collect::<Vec<_>>()
        })
        .to_string()
    }

    #[test]
    fn test_zstd_text_roundtrip() {
        let codec = ZstdCodec::default();
        let stored = compress_text(&codec, &sample()).unwrap();
        assert_eq!(decompress_text(&codec, &stored).unwrap(), sample());
    }

    #[test]
    fn test_gzip_text_roundtrip() {
        let codec = GzipCodec;
        let stored = compress_text(&codec, &sample()).unwrap();
        assert_eq!(decompress_text(&codec, &stored).unwrap(), sample());
    }

    #[test]
    fn test_zstd_output_has_magic() {
        let compressed = ZstdCodec::default().compress(b"hello hello hello").unwrap();
        assert!(is_zstd(&compressed));
        assert!(!is_zstd(b"{\"plain\": true}"));
        assert!(!is_zstd(b""));
    }

    #[test]
    fn test_decompress_garbage_fails_cleanly() {
        let codec = ZstdCodec::default();
        assert!(matches!(
            decompress_text(&codec, "not base64!!"),
            Err(CompressionError::Encoding(_))
        ));
        let not_zstd = STANDARD.encode(b"plain bytes");
        assert!(matches!(
            decompress_text(&codec, &not_zstd),
            Err(CompressionError::DecompressFailed(_))
        ));
        assert!(GzipCodec.decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_repetitive_json_compresses() {
        let text = sample();
        for codec in [&ZstdCodec::default() as &dyn CompressionCodec, &GzipCodec] {
            let compressed = codec.compress(text.as_bytes()).unwrap();
            assert!(
                compressed.len() * 2 < text.len(),
                "{} saved less than half: {} -> {}",
                codec.name(),
                text.len(),
                compressed.len()
            );
        }
    }
}
