//! Identifiers
//!
//! Strongly typed ids for clients, games and cards.
//! Client and game ids are UUIDs stored as raw bytes so they order
//! deterministically in maps and encode compactly on the wire.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Seat index of a player inside a game (0-based).
pub type PlayerIndex = usize;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Generate a fresh random (v4) id.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().into_bytes())
            }

            /// Create from UUID string.
            pub fn from_uuid_str(s: &str) -> Option<Self> {
                uuid::Uuid::parse_str(s)
                    .ok()
                    .map(|u| Self(*u.as_bytes()))
            }

            /// Convert to UUID string.
            pub fn to_uuid_string(&self) -> String {
                uuid::Uuid::from_bytes(self.0).to_string()
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Short hex prefix for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.short())
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a connected client.
    ClientId
);

uuid_id!(
    /// Unique identifier of an authoritative game session.
    GameId
);

/// Identifier of a card instance inside one game.
///
/// Assigned by the rules engine; stable for the lifetime of the card object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardId(pub u32);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
