//! Codec Contract
//!
//! The interface every wire codec implements, plus the shared error
//! and version types.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::registry::WireValue;

/// Which half of the codec failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOperation {
    /// Encoding a value.
    Serialize,
    /// Decoding a payload.
    Deserialize,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodecOperation::Serialize => "serialize",
            CodecOperation::Deserialize => "deserialize",
        })
    }
}

/// Codec-level failure.
///
/// Always names the protocol and operation; low-level library errors are
/// flattened into `reason` and never escape the codec boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{protocol} {operation} failed: {reason}")]
pub struct SerializationError {
    /// Protocol name.
    pub protocol: &'static str,
    /// Operation that failed.
    pub operation: CodecOperation,
    /// Failure description.
    pub reason: String,
}

impl SerializationError {
    /// Build a serialize-side error.
    pub fn serialize(protocol: &'static str, reason: impl Into<String>) -> Self {
        Self {
            protocol,
            operation: CodecOperation::Serialize,
            reason: reason.into(),
        }
    }

    /// Build a deserialize-side error.
    pub fn deserialize(protocol: &'static str, reason: impl Into<String>) -> Self {
        Self {
            protocol,
            operation: CodecOperation::Deserialize,
            reason: reason.into(),
        }
    }
}

/// Protocol version (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Incompatible changes bump this.
    pub major: u16,
    /// Backwards-compatible additions bump this.
    pub minor: u16,
}

impl ProtocolVersion {
    /// Create a version.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// A peer speaking `other` can be served by a codec at `self`.
    ///
    /// Same major, and the peer's minor is not newer than ours.
    pub fn is_compatible_with(&self, other: ProtocolVersion) -> bool {
        self.major == other.major && other.minor <= self.minor
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error parsing a `major.minor` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid protocol version: {0:?}")]
pub struct ParseVersionError(pub String);

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

/// A wire codec.
///
/// Implementations hold only immutable configuration; every call builds
/// its own encoder/decoder state, so one instance can be shared freely
/// across threads.
pub trait NetworkProtocol: Send + Sync {
    /// Encode a value. `None` is always rejected.
    fn serialize<T: WireValue>(&self, value: Option<&T>) -> Result<Vec<u8>, SerializationError>;

    /// Decode a payload, decompressing first if needed.
    fn deserialize<T: WireValue>(&self, bytes: &[u8]) -> Result<T, SerializationError>;

    /// Check the compression magic prefix without decoding.
    fn is_compressed(&self, bytes: &[u8]) -> bool {
        super::compression::has_magic(bytes)
    }

    /// Protocol name, negotiated out of band.
    fn protocol_name(&self) -> &'static str;

    /// Version this codec speaks.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Whether a peer at `version` can talk to this codec.
    fn supports_version(&self, version: ProtocolVersion) -> bool {
        self.protocol_version().is_compatible_with(version)
    }

    /// Encode a value that is known to be present.
    fn serialize_value<T: WireValue>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        self.serialize(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!("2.1".parse::<ProtocolVersion>(), Ok(ProtocolVersion::new(2, 1)));
        assert!("2".parse::<ProtocolVersion>().is_err());
        assert!("a.b".parse::<ProtocolVersion>().is_err());
        assert_eq!(ProtocolVersion::new(3, 0).to_string(), "3.0");
    }

    #[test]
    fn test_version_compatibility() {
        let ours = ProtocolVersion::new(2, 1);
        assert!(ours.is_compatible_with(ProtocolVersion::new(2, 0)));
        assert!(ours.is_compatible_with(ProtocolVersion::new(2, 1)));
        assert!(!ours.is_compatible_with(ProtocolVersion::new(2, 2)));
        assert!(!ours.is_compatible_with(ProtocolVersion::new(1, 1)));
        assert!(!ours.is_compatible_with(ProtocolVersion::new(3, 0)));
    }

    #[test]
    fn test_error_display_names_protocol_and_operation() {
        let err = SerializationError::deserialize("bincode", "empty buffer");
        assert_eq!(err.to_string(), "bincode deserialize failed: empty buffer");
        assert_eq!(err.operation, CodecOperation::Deserialize);
    }
}
