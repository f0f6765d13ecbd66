//! Connection States
//!
//! The four lifecycle states of a client connection and the fixed
//! table of legal transitions between them.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ids::ClientId;

/// Lifecycle state of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Link established and usable.
    Connected,
    /// Link lost or closed.
    Disconnected,
    /// Attempting to restore a lost link.
    Reconnecting,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Reconnecting,
    ];

    /// States reachable from `self` in a single transition.
    pub fn allowed_targets(self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Connecting => &[Connected, Disconnected],
            Connected => &[Disconnected, Reconnecting],
            Disconnected => &[Connecting, Reconnecting],
            Reconnecting => &[Connected, Disconnected],
        }
    }

    /// Check the transition table. Self-transitions are never legal.
    #[inline]
    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Stable lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Record of one accepted state transition.
///
/// Built exactly once by the state machine; fields are read-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    client_id: ClientId,
    from: ConnectionState,
    to: ConnectionState,
    sequence: u64,
    timestamp: DateTime<Utc>,
}

impl StateTransition {
    pub(crate) fn new(
        client_id: ClientId,
        from: ConnectionState,
        to: ConnectionState,
        sequence: u64,
    ) -> Self {
        Self {
            client_id,
            from,
            to,
            sequence,
            timestamp: Utc::now(),
        }
    }

    /// Client that transitioned.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// State before the transition.
    pub fn from(&self) -> ConnectionState {
        self.from
    }

    /// State after the transition.
    pub fn to(&self) -> ConnectionState {
        self.to
    }

    /// Per-client sequence number (1 for the first accepted transition).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the transition was accepted.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
