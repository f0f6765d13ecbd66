//! Payload Compression
//!
//! Gzip framing for large payloads. A compressed payload always starts
//! with the two-byte gzip magic, so detection needs no decoding.

use std::io::{Read, Write};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::codec::SerializationError;
use super::ProtocolConfig;

/// Gzip member header magic (RFC 1952).
pub const COMPRESSION_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Encoded payloads at or above this size are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// O(1) check for the compression magic prefix.
#[inline]
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.len() >= COMPRESSION_MAGIC.len() && bytes[..2] == COMPRESSION_MAGIC
}

/// Compress a fully encoded payload.
pub fn compress(raw: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::new(level));
    encoder.write_all(raw)?;
    encoder.finish()
}

/// Decompress, refusing output larger than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("decompressed payload exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

/// Apply the size threshold to an encoded frame.
pub(crate) fn seal_frame(
    protocol: &'static str,
    frame: Vec<u8>,
    config: &ProtocolConfig,
) -> Result<Vec<u8>, SerializationError> {
    if frame.len() > config.max_message_size {
        return Err(SerializationError::serialize(
            protocol,
            format!("encoded size {} exceeds limit {}", frame.len(), config.max_message_size),
        ));
    }
    if frame.len() < config.compression_threshold {
        return Ok(frame);
    }
    compress(&frame, config.compression_level)
        .map_err(|e| SerializationError::serialize(protocol, format!("compression failed: {}", e)))
}

/// Reject empty input and undo compression if present.
pub(crate) fn open_frame(
    protocol: &'static str,
    bytes: &[u8],
    config: &ProtocolConfig,
) -> Result<Vec<u8>, SerializationError> {
    if bytes.is_empty() {
        return Err(SerializationError::deserialize(protocol, "empty buffer"));
    }
    if !has_magic(bytes) {
        return Ok(bytes.to_vec());
    }
    let raw = decompress(bytes, config.max_message_size).map_err(|e| {
        SerializationError::deserialize(protocol, format!("corrupt compressed payload: {}", e))
    })?;
    if raw.is_empty() {
        return Err(SerializationError::deserialize(protocol, "empty payload after decompression"));
    }
    Ok(raw)
}
