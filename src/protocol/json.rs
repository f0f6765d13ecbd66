//! JSON Codec
//!
//! Human-readable reference codec. Frames are plain serde_json documents;
//! JSON text never begins with `0x1F`, so compression detection stays
//! unambiguous. JSON has no literal for NaN or infinity, so such floats
//! are refused instead of being written as `null`.

use super::codec::{NetworkProtocol, ProtocolVersion, SerializationError};
use super::compression::{open_frame, seal_frame};
use super::registry::WireValue;
use super::ProtocolConfig;

/// Negotiated name of the JSON codec.
pub const JSON_PROTOCOL_NAME: &str = "json";

/// Version spoken by the JSON codec.
pub const JSON_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0);

/// serde_json codec.
#[derive(Debug, Clone, Default)]
pub struct JsonProtocol {
    config: ProtocolConfig,
}

impl JsonProtocol {
    /// Create a codec with explicit limits.
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }
}

impl NetworkProtocol for JsonProtocol {
    fn serialize<T: WireValue>(&self, value: Option<&T>) -> Result<Vec<u8>, SerializationError> {
        let value = value.ok_or_else(|| {
            SerializationError::serialize(JSON_PROTOCOL_NAME, format!("null {} value", T::TYPE_NAME))
        })?;
        if value.has_non_finite_float() {
            return Err(SerializationError::serialize(
                JSON_PROTOCOL_NAME,
                format!("non-finite {} has no JSON encoding", T::TYPE_NAME),
            ));
        }
        let frame = serde_json::to_vec(value)
            .map_err(|e| SerializationError::serialize(JSON_PROTOCOL_NAME, e.to_string()))?;
        seal_frame(JSON_PROTOCOL_NAME, frame, &self.config)
    }

    fn deserialize<T: WireValue>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        let frame = open_frame(JSON_PROTOCOL_NAME, bytes, &self.config)?;
        serde_json::from_slice(&frame).map_err(|e| {
            SerializationError::deserialize(JSON_PROTOCOL_NAME, format!("invalid {}: {}", T::TYPE_NAME, e))
        })
    }

    fn protocol_name(&self) -> &'static str {
        JSON_PROTOCOL_NAME
    }

    fn protocol_version(&self) -> ProtocolVersion {
        JSON_PROTOCOL_VERSION
    }
}
