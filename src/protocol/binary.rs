//! Binary Codec
//!
//! Compact bincode encoding. Frame layout before compression:
//!
//! ```text
//! [type tag: u8][bincode body]
//! ```

use bincode::Options;
use tracing::trace;

use super::codec::{NetworkProtocol, ProtocolVersion, SerializationError};
use super::compression::{open_frame, seal_frame};
use super::registry::{type_name_for_tag, WireValue};
use super::ProtocolConfig;

/// Negotiated name of the binary codec.
pub const BINARY_PROTOCOL_NAME: &str = "bincode";

/// Version spoken by the binary codec.
pub const BINARY_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 0);

/// High-performance tagged bincode codec.
#[derive(Debug, Clone, Default)]
pub struct BinaryProtocol {
    config: ProtocolConfig,
}

impl BinaryProtocol {
    /// Create a codec with explicit limits.
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Codec configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_limit(self.config.max_message_size as u64)
            .reject_trailing_bytes()
    }
}

impl NetworkProtocol for BinaryProtocol {
    fn serialize<T: WireValue>(&self, value: Option<&T>) -> Result<Vec<u8>, SerializationError> {
        let value = value.ok_or_else(|| {
            SerializationError::serialize(BINARY_PROTOCOL_NAME, format!("null {} value", T::TYPE_NAME))
        })?;

        let mut frame = vec![T::TYPE_TAG];
        self.options()
            .serialize_into(&mut frame, value)
            .map_err(|e| SerializationError::serialize(BINARY_PROTOCOL_NAME, e.to_string()))?;

        trace!(kind = T::TYPE_NAME, size = frame.len(), "binary frame encoded");
        seal_frame(BINARY_PROTOCOL_NAME, frame, &self.config)
    }

    fn deserialize<T: WireValue>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        let frame = open_frame(BINARY_PROTOCOL_NAME, bytes, &self.config)?;
        let (&tag, body) = frame
            .split_first()
            .ok_or_else(|| SerializationError::deserialize(BINARY_PROTOCOL_NAME, "missing type tag"))?;

        if tag != T::TYPE_TAG {
            let found = type_name_for_tag(tag).unwrap_or("unknown");
            return Err(SerializationError::deserialize(
                BINARY_PROTOCOL_NAME,
                format!(
                    "type tag mismatch: expected {} ({:#04x}), found {} ({:#04x})",
                    T::TYPE_NAME,
                    T::TYPE_TAG,
                    found,
                    tag
                ),
            ));
        }

        self.options()
            .deserialize(body)
            .map_err(|e| SerializationError::deserialize(BINARY_PROTOCOL_NAME, e.to_string()))
    }

    fn protocol_name(&self) -> &'static str {
        BINARY_PROTOCOL_NAME
    }

    fn protocol_version(&self) -> ProtocolVersion {
        BINARY_PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::protocol::compression::{compress, has_magic, COMPRESSION_MAGIC};
    use proptest::prelude::*;

    fn codec() -> BinaryProtocol {
        BinaryProtocol::default()
    }

    #[test]
    fn test_roundtrip_strings() {
        let codec = codec();
        let cases = vec![
            String::new(),
            "x".repeat(100_000),
            "tab\tnull\0bell\u{7}newline\n".to_string(),
            "pair \u{1F0A1} \u{1D11E} emoji".to_string(),
        ];
        for case in cases {
            let bytes = codec.serialize_value(&case).unwrap();
            assert_eq!(codec.deserialize::<String>(&bytes).unwrap(), case);
        }
    }

    #[test]
    fn test_roundtrip_primitives() {
        let codec = codec();
        let bytes = codec.serialize_value(&i64::MIN).unwrap();
        assert_eq!(codec.deserialize::<i64>(&bytes).unwrap(), i64::MIN);

        let bytes = codec.serialize_value(&-0.25f64).unwrap();
        assert_eq!(codec.deserialize::<f64>(&bytes).unwrap(), -0.25);

        let bytes = codec.serialize_value(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(
            codec.deserialize::<ConnectionState>(&bytes).unwrap(),
            ConnectionState::Reconnecting
        );
    }

    #[test]
    fn test_non_finite_floats_roundtrip() {
        let codec = codec();
        for value in [f64::INFINITY, f64::NEG_INFINITY] {
            let bytes = codec.serialize_value(&value).unwrap();
            assert_eq!(codec.deserialize::<f64>(&bytes).unwrap(), value);
        }
        let bytes = codec.serialize_value(&f64::NAN).unwrap();
        assert!(codec.deserialize::<f64>(&bytes).unwrap().is_nan());
    }

    #[test]
    fn test_uncompressed_frame_starts_with_tag() {
        let bytes = codec().serialize_value(&true).unwrap();
        assert_eq!(bytes[0], bool::TYPE_TAG);
        assert!(!has_magic(&bytes));
    }

    #[test]
    fn test_null_rejected() {
        let err = codec().serialize::<String>(None).unwrap_err();
        assert_eq!(err.protocol, BINARY_PROTOCOL_NAME);
        assert!(err.reason.contains("null"));
    }

    #[test]
    fn test_empty_and_corrupt_rejected() {
        let codec = codec();
        assert!(codec.deserialize::<String>(&[]).is_err());

        let mut corrupt = COMPRESSION_MAGIC.to_vec();
        corrupt.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(codec.deserialize::<String>(&corrupt).is_err());
    }

    #[test]
    fn test_tag_mismatch_rejected() {
        let codec = codec();
        let bytes = codec.serialize_value(&7u32).unwrap();
        let err = codec.deserialize::<String>(&bytes).unwrap_err();
        assert!(err.reason.contains("type tag mismatch"));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let codec = codec();
        let mut bytes = codec.serialize_value(&7u32).unwrap();
        bytes.push(0);
        assert!(codec.deserialize::<u32>(&bytes).is_err());
    }

    #[test]
    fn test_small_compressed_frame_decodes() {
        // Peers may compress below the threshold; decoding only looks at the magic.
        let codec = codec();
        let mut frame = vec![String::TYPE_TAG];
        bincode::DefaultOptions::new()
            .serialize_into(&mut frame, &"short".to_string())
            .unwrap();
        let compressed = compress(&frame, 6).unwrap();
        assert_eq!(codec.deserialize::<String>(&compressed).unwrap(), "short");
    }

    #[test]
    fn test_oversize_rejected() {
        let codec = BinaryProtocol::new(ProtocolConfig {
            max_message_size: 64,
            ..ProtocolConfig::default()
        });
        assert!(codec.serialize_value(&"y".repeat(200)).is_err());
    }

    #[test]
    fn test_version_support() {
        let codec = codec();
        assert!(codec.supports_version(ProtocolVersion::new(2, 0)));
        assert!(!codec.supports_version(ProtocolVersion::new(2, 1)));
        assert!(!codec.supports_version(ProtocolVersion::new(1, 0)));
    }

    proptest! {
        #[test]
        fn prop_string_roundtrip(s in ".*") {
            let codec = codec();
            let bytes = codec.serialize_value(&s).unwrap();
            prop_assert_eq!(codec.deserialize::<String>(&bytes).unwrap(), s);
        }

        #[test]
        fn prop_compressed_iff_over_threshold(len in 0usize..4096) {
            let codec = codec();
            let value = vec![0xABu8; len];
            let mut raw = vec![<Vec<u8>>::TYPE_TAG];
            bincode::DefaultOptions::new().serialize_into(&mut raw, &value).unwrap();
            let bytes = codec.serialize_value(&value).unwrap();
            prop_assert_eq!(codec.is_compressed(&bytes), raw.len() >= 1024);
            if raw.len() >= 1024 {
                prop_assert!(bytes.len() < raw.len());
            }
        }
    }
}
