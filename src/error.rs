//! Network Error Taxonomy
//!
//! Typed failures of the sync layer. Each error knows whether it can be
//! recovered and which recovery it calls for; the recovery framework
//! routes on that.

use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::{ClientId, GameId, PlayerIndex};
use crate::protocol::{CodecOperation, ProtocolVersion, SerializationError};

/// Kind of recovery an error calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryType {
    /// Ask the peer to resend.
    Retry,
    /// Rebuild and resend the full view.
    Resync,
    /// Restore the link.
    Reconnect,
    /// Nothing can be done; end the session.
    Terminate,
}

impl RecoveryType {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryType::Retry => "retry",
            RecoveryType::Resync => "resync",
            RecoveryType::Reconnect => "reconnect",
            RecoveryType::Terminate => "terminate",
        }
    }
}

/// A payload that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {message_type} message: {parse_error}")]
pub struct MalformedMessageError {
    /// Wire type the payload was expected to be.
    pub message_type: String,
    /// Parser diagnostic.
    pub parse_error: String,
    /// Size the payload should have had, if known.
    pub expected_size: Option<usize>,
    /// Size actually received, if known.
    pub actual_size: Option<usize>,
}

impl MalformedMessageError {
    /// Create with no size information.
    pub fn new(message_type: impl Into<String>, parse_error: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            parse_error: parse_error.into(),
            expected_size: None,
            actual_size: None,
        }
    }

    /// Attach size information.
    pub fn with_sizes(mut self, expected: Option<usize>, actual: Option<usize>) -> Self {
        self.expected_size = expected;
        self.actual_size = actual;
        self
    }

    /// Both sizes are known and differ.
    pub fn is_size_mismatch(&self) -> bool {
        matches!((self.expected_size, self.actual_size), (Some(e), Some(a)) if e != a)
    }
}

impl From<SerializationError> for MalformedMessageError {
    fn from(err: SerializationError) -> Self {
        Self::new(err.protocol, err.reason)
    }
}

/// Wire-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Inbound payload could not be decoded.
    #[error(transparent)]
    Malformed(#[from] MalformedMessageError),

    /// Peer speaks an incompatible codec version.
    #[error("{protocol} version mismatch: server {ours}, client {theirs}")]
    VersionMismatch {
        /// Codec name.
        protocol: String,
        /// Server version.
        ours: ProtocolVersion,
        /// Client version.
        theirs: ProtocolVersion,
    },

    /// Outbound value could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(SerializationError),
}

impl From<SerializationError> for ProtocolError {
    fn from(err: SerializationError) -> Self {
        match err.operation {
            CodecOperation::Deserialize => ProtocolError::Malformed(err.into()),
            CodecOperation::Serialize => ProtocolError::Encode(err),
        }
    }
}

/// Client and server disagree about game state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("game {game_id} out of sync: {detail}")]
pub struct GameStateError {
    /// Game identifier.
    pub game_id: GameId,
    /// Seat whose view diverged, if known.
    pub player_index: Option<PlayerIndex>,
    /// Version the server is at.
    pub server_version: Option<u64>,
    /// Description.
    pub detail: String,
}

/// An action failed authorization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} by player {player_index} rejected: {reason}")]
pub struct ValidationError {
    /// Game the action targeted.
    pub game_id: Option<GameId>,
    /// Acting seat.
    pub player_index: PlayerIndex,
    /// Action kind.
    pub action: String,
    /// Denial reason.
    pub reason: String,
    /// Denial looks like the client is acting on a stale view. Callers
    /// decide from this whether a resync is worth starting.
    pub stale_view: bool,
}

/// Link-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Link dropped.
    #[error("connection to {client_id} lost: {reason}")]
    Lost {
        /// Client identifier.
        client_id: ClientId,
        /// Description.
        reason: String,
    },

    /// Peer stopped responding.
    #[error("connection to {client_id} timed out after {after:?}")]
    Timeout {
        /// Client identifier.
        client_id: ClientId,
        /// Silence duration.
        after: Duration,
    },

    /// Peer refused the session.
    #[error("connection to {client_id} refused: {reason}")]
    Refused {
        /// Client identifier.
        client_id: ClientId,
        /// Description.
        reason: String,
    },
}

impl ConnectionError {
    /// Client the link belongs to.
    pub fn client_id(&self) -> ClientId {
        match self {
            ConnectionError::Lost { client_id, .. }
            | ConnectionError::Timeout { client_id, .. }
            | ConnectionError::Refused { client_id, .. } => *client_id,
        }
    }
}

/// Any sync-layer failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Wire-level failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// State divergence.
    #[error("game state error: {0}")]
    GameState(#[from] GameStateError),
    /// Authorization failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Link failure.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

impl NetworkError {
    /// Recovery this error calls for.
    pub fn recommended_strategy(&self) -> RecoveryType {
        match self {
            NetworkError::Protocol(ProtocolError::Malformed(_)) => RecoveryType::Retry,
            NetworkError::Protocol(_) => RecoveryType::Terminate,
            NetworkError::GameState(_) => RecoveryType::Resync,
            NetworkError::Validation(_) => RecoveryType::Resync,
            NetworkError::Connection(ConnectionError::Refused { .. }) => RecoveryType::Terminate,
            NetworkError::Connection(_) => RecoveryType::Reconnect,
        }
    }

    /// Whether any recovery applies.
    pub fn is_recoverable(&self) -> bool {
        self.recommended_strategy() != RecoveryType::Terminate
    }

    /// Short category name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::Protocol(_) => "protocol",
            NetworkError::GameState(_) => "game_state",
            NetworkError::Validation(_) => "validation",
            NetworkError::Connection(_) => "connection",
        }
    }

    /// Game the error concerns, if any.
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            NetworkError::GameState(e) => Some(e.game_id),
            NetworkError::Validation(e) => e.game_id,
            _ => None,
        }
    }

    /// Client the error concerns, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            NetworkError::Connection(e) => Some(e.client_id()),
            _ => None,
        }
    }
}

impl From<SerializationError> for NetworkError {
    fn from(err: SerializationError) -> Self {
        NetworkError::Protocol(err.into())
    }
}

impl From<MalformedMessageError> for NetworkError {
    fn from(err: MalformedMessageError) -> Self {
        NetworkError::Protocol(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch() {
        let err = MalformedMessageError::new("view", "eof");
        assert!(!err.is_size_mismatch());
        assert!(!err.clone().with_sizes(Some(10), None).is_size_mismatch());
        assert!(!err.clone().with_sizes(Some(10), Some(10)).is_size_mismatch());
        assert!(err.with_sizes(Some(10), Some(7)).is_size_mismatch());
    }

    #[test]
    fn test_malformed_recommends_retry() {
        let err: NetworkError = MalformedMessageError::new("action", "bad tag").into();
        assert_eq!(err.recommended_strategy(), RecoveryType::Retry);
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let decode: NetworkError = SerializationError::deserialize("bincode", "truncated").into();
        assert!(matches!(decode, NetworkError::Protocol(ProtocolError::Malformed(_))));
        assert_eq!(decode.recommended_strategy(), RecoveryType::Retry);

        let encode: NetworkError = SerializationError::serialize("bincode", "too large").into();
        assert_eq!(encode.recommended_strategy(), RecoveryType::Terminate);
    }

    #[test]
    fn test_classification() {
        let game_id = GameId::new([1; 16]);
        let client_id = ClientId::new([2; 16]);

        let desync = NetworkError::from(GameStateError {
            game_id,
            player_index: Some(0),
            server_version: Some(4),
            detail: "digest mismatch".into(),
        });
        assert_eq!(desync.recommended_strategy(), RecoveryType::Resync);
        assert_eq!(desync.game_id(), Some(game_id));

        let stale = ValidationError {
            game_id: Some(game_id),
            player_index: 1,
            action: "pass_priority".into(),
            reason: "no priority".into(),
            stale_view: true,
        };
        assert_eq!(NetworkError::from(stale.clone()).recommended_strategy(), RecoveryType::Resync);
        // Every validation failure recommends a resync; the flag is a hint
        // for the caller, not a different category.
        let cheat = NetworkError::from(ValidationError { stale_view: false, ..stale });
        assert_eq!(cheat.recommended_strategy(), RecoveryType::Resync);
        assert!(cheat.is_recoverable());
        assert_eq!(cheat.kind(), "validation");

        let lost = NetworkError::from(ConnectionError::Lost { client_id, reason: "reset".into() });
        assert_eq!(lost.recommended_strategy(), RecoveryType::Reconnect);
        assert_eq!(lost.client_id(), Some(client_id));

        let refused = NetworkError::from(ConnectionError::Refused { client_id, reason: "full".into() });
        assert!(!refused.is_recoverable());
    }
}
