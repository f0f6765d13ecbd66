//! Protocol Messages
//!
//! Envelopes exchanged between clients and the sync hub. Enums are
//! externally tagged so both the binary and JSON codecs can carry them.

use serde::{Serialize, Deserialize};

use crate::core::hash::ViewDigest;
use crate::core::ids::{ClientId, GameId, PlayerIndex};
use crate::view::{PlayerAction, PlayerView};
use super::codec::ProtocolVersion;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open (or resume) a session.
    Hello(HelloRequest),

    /// Submit a game action.
    Action(ActionRequest),

    /// Ask for a full view, optionally echoing the digest the client holds.
    SyncRequest {
        /// Game to resync.
        game_id: GameId,
        /// Digest of the client's current view.
        digest: Option<ViewDigest>,
    },

    /// Acknowledge receipt of a view version.
    Ack {
        /// Game the view belongs to.
        game_id: GameId,
        /// Acknowledged version.
        version: u64,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp.
        timestamp: u64,
    },

    /// Client is leaving.
    Leave,
}

/// Session handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Identity claimed by the client.
    pub client_id: ClientId,
    /// Codec the client speaks.
    pub protocol: String,
    /// Codec version the client speaks.
    pub version: ProtocolVersion,
    /// Resume a session that was dropped.
    pub resume: bool,
}

/// A game action with its client-side sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Target game.
    pub game_id: GameId,
    /// Acting seat.
    pub player_index: PlayerIndex,
    /// Client-assigned sequence, echoed in rejections.
    pub sequence: u64,
    /// The action.
    pub action: PlayerAction,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake result.
    Welcome(WelcomeInfo),

    /// Incremental view after a state change.
    View(PlayerView),

    /// Action denied by the authorization gate.
    ActionRejected {
        /// Game the action targeted.
        game_id: GameId,
        /// Client sequence of the rejected action.
        sequence: u64,
        /// Denial reason.
        reason: String,
    },

    /// Full view sent after a desync or reconnect.
    Resync(PlayerView),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in milliseconds since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason shown to the user.
        reason: String,
    },
}

/// Handshake response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Identity the session is bound to.
    pub client_id: ClientId,
    /// Codec the server speaks.
    pub protocol: String,
    /// Codec version the server speaks.
    pub version: ProtocolVersion,
    /// Whether the session was accepted.
    pub accepted: bool,
    /// Whether an earlier session was resumed.
    pub resumed: bool,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Payload could not be decoded; resend it.
    MalformedMessage,
    /// Message arrived before `Hello`.
    NotConnected,
    /// Game unknown or not joined.
    GameNotFound,
    /// Codec version mismatch.
    VersionMismatch,
    /// Claimed client id already has a live session.
    ClientIdInUse,
    /// Session state is unrecoverable.
    StateCorrupted,
    /// Internal error.
    InternalError,
}

// =============================================================================
// HELPERS
// =============================================================================

impl ClientMessage {
    /// Short name for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "hello",
            ClientMessage::Action(_) => "action",
            ClientMessage::SyncRequest { .. } => "sync_request",
            ClientMessage::Ack { .. } => "ack",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Leave => "leave",
        }
    }
}

impl ServerMessage {
    /// Short name for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::View(_) => "view",
            ServerMessage::ActionRejected { .. } => "action_rejected",
            ServerMessage::Resync(_) => "resync",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error(_) => "error",
            ServerMessage::Shutdown { .. } => "shutdown",
        }
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::CardId;
    use crate::protocol::{BinaryProtocol, JsonProtocol, NetworkProtocol};
    use crate::view::Target;

    fn action_message() -> ClientMessage {
        ClientMessage::Action(ActionRequest {
            game_id: GameId::new([3; 16]),
            player_index: 1,
            sequence: 42,
            action: PlayerAction::PlayCard {
                card: CardId(17),
                targets: vec![Target::Player(0), Target::Card(CardId(9))],
            },
        })
    }

    #[test]
    fn test_client_message_both_codecs() {
        let msg = action_message();
        let binary = BinaryProtocol::default();
        let json = JsonProtocol::default();

        let bytes = binary.serialize_value(&msg).unwrap();
        assert_eq!(binary.deserialize::<ClientMessage>(&bytes).unwrap(), msg);

        let text = json.serialize_value(&msg).unwrap();
        assert_eq!(json.deserialize::<ClientMessage>(&text).unwrap(), msg);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&ClientMessage::Ping { timestamp: 5 }).unwrap();
        assert_eq!(json, r#"{"ping":{"timestamp":5}}"#);

        let json = serde_json::to_string(&ServerMessage::error(ErrorCode::VersionMismatch, "old")).unwrap();
        assert!(json.contains("version_mismatch"));
    }

    #[test]
    fn test_sync_request_digest() {
        let msg = ClientMessage::SyncRequest {
            game_id: GameId::new([1; 16]),
            digest: Some([0xAA; 32]),
        };
        let binary = BinaryProtocol::default();
        let bytes = binary.serialize_value(&msg).unwrap();
        assert_eq!(binary.deserialize::<ClientMessage>(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_client_frame_not_decodable_as_server() {
        let binary = BinaryProtocol::default();
        let bytes = binary.serialize_value(&ClientMessage::Leave).unwrap();
        assert!(binary.deserialize::<ServerMessage>(&bytes).is_err());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(action_message().kind(), "action");
        assert_eq!(ServerMessage::Shutdown { reason: String::new() }.kind(), "shutdown");
    }
}
