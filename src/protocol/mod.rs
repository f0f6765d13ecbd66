//! Wire Protocol
//!
//! Versioned, pluggable codecs over a closed set of wire types.
//!
//! - `codec`: the `NetworkProtocol` contract and error types
//! - `binary` / `json`: the two codec implementations
//! - `compression`: gzip framing above a size threshold
//! - `registry`: wire type tags
//! - `messages`: client/server envelopes

pub mod codec;
pub mod compression;
pub mod registry;
pub mod binary;
pub mod json;
pub mod messages;

pub use codec::{CodecOperation, NetworkProtocol, ParseVersionError, ProtocolVersion, SerializationError};
pub use compression::{COMPRESSION_MAGIC, DEFAULT_COMPRESSION_THRESHOLD};
pub use registry::WireValue;
pub use binary::{BinaryProtocol, BINARY_PROTOCOL_NAME, BINARY_PROTOCOL_VERSION};
pub use json::{JsonProtocol, JSON_PROTOCOL_NAME, JSON_PROTOCOL_VERSION};
pub use messages::{
    ActionRequest, ClientMessage, ErrorCode, HelloRequest, ServerError, ServerMessage, WelcomeInfo,
};

/// Codec limits and selection.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Codec name used by `AnyProtocol::from_config`.
    pub codec: String,
    /// Encoded payloads at or above this size are compressed.
    pub compression_threshold: usize,
    /// Largest accepted frame, before and after decompression.
    pub max_message_size: usize,
    /// Gzip level (0-9).
    pub compression_level: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            codec: BINARY_PROTOCOL_NAME.to_string(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_message_size: 16 * 1024 * 1024,
            compression_level: 6,
        }
    }
}

impl ProtocolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            codec: std::env::var("CARD_SYNC_CODEC").unwrap_or(defaults.codec),
            compression_threshold: std::env::var("CARD_SYNC_COMPRESSION_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compression_threshold),
            max_message_size: std::env::var("CARD_SYNC_MAX_MESSAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_message_size),
            compression_level: std::env::var("CARD_SYNC_COMPRESSION_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|level: u32| level.min(9))
                .unwrap_or(defaults.compression_level),
        }
    }
}

/// Codec chosen at runtime by name.
#[derive(Debug, Clone)]
pub enum AnyProtocol {
    /// Tagged bincode.
    Binary(BinaryProtocol),
    /// serde_json.
    Json(JsonProtocol),
}

impl AnyProtocol {
    /// Build the codec named by `config.codec`.
    pub fn from_config(config: ProtocolConfig) -> Option<Self> {
        match config.codec.as_str() {
            BINARY_PROTOCOL_NAME => Some(AnyProtocol::Binary(BinaryProtocol::new(config))),
            JSON_PROTOCOL_NAME => Some(AnyProtocol::Json(JsonProtocol::new(config))),
            _ => None,
        }
    }
}

impl Default for AnyProtocol {
    fn default() -> Self {
        AnyProtocol::Binary(BinaryProtocol::default())
    }
}

impl NetworkProtocol for AnyProtocol {
    fn serialize<T: WireValue>(&self, value: Option<&T>) -> Result<Vec<u8>, SerializationError> {
        match self {
            AnyProtocol::Binary(p) => p.serialize(value),
            AnyProtocol::Json(p) => p.serialize(value),
        }
    }

    fn deserialize<T: WireValue>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self {
            AnyProtocol::Binary(p) => p.deserialize(bytes),
            AnyProtocol::Json(p) => p.deserialize(bytes),
        }
    }

    fn protocol_name(&self) -> &'static str {
        match self {
            AnyProtocol::Binary(p) => p.protocol_name(),
            AnyProtocol::Json(p) => p.protocol_name(),
        }
    }

    fn protocol_version(&self) -> ProtocolVersion {
        match self {
            AnyProtocol::Binary(p) => p.protocol_version(),
            AnyProtocol::Json(p) => p.protocol_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_protocol_by_name() {
        let json = AnyProtocol::from_config(ProtocolConfig {
            codec: "json".into(),
            ..ProtocolConfig::default()
        })
        .unwrap();
        assert_eq!(json.protocol_name(), JSON_PROTOCOL_NAME);

        let binary = AnyProtocol::from_config(ProtocolConfig::default()).unwrap();
        assert_eq!(binary.protocol_name(), BINARY_PROTOCOL_NAME);

        assert!(AnyProtocol::from_config(ProtocolConfig {
            codec: "xml".into(),
            ..ProtocolConfig::default()
        })
        .is_none());
    }

    #[test]
    fn test_any_protocol_delegates() {
        let codec = AnyProtocol::default();
        let bytes = codec.serialize_value(&"hello".to_string()).unwrap();
        assert_eq!(codec.deserialize::<String>(&bytes).unwrap(), "hello");
    }
}
