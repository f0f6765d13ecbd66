//! Wire Type Registry
//!
//! The closed set of types the codecs accept. Each type carries a one-byte
//! tag that prefixes binary frames; `0x1F` is reserved because it is the
//! first byte of the compression magic.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::{ConnectionState, StateTransition};
use crate::view::{PlayerAction, PlayerView};
use super::messages::{ClientMessage, ServerMessage};

/// Tag value never assigned to a wire type.
pub const RESERVED_TAG: u8 = super::compression::COMPRESSION_MAGIC[0];

/// A type that may cross the wire.
pub trait WireValue: Serialize + DeserializeOwned {
    /// Binary frame tag.
    const TYPE_TAG: u8;
    /// Name used in error messages and telemetry.
    const TYPE_NAME: &'static str;

    /// Whether the value holds a NaN or infinite float. Text codecs have no
    /// encoding for those and refuse them.
    fn has_non_finite_float(&self) -> bool {
        false
    }
}

macro_rules! wire_types {
    ($($ty:ty => $tag:literal, $name:literal $(, non_finite: $check:expr)?;)*) => {
        $(
            impl WireValue for $ty {
                const TYPE_TAG: u8 = $tag;
                const TYPE_NAME: &'static str = $name;

                $(
                    fn has_non_finite_float(&self) -> bool {
                        ($check)(self)
                    }
                )?
            }
        )*

        /// Every registered `(tag, name)` pair.
        pub const REGISTERED_TYPES: &[(u8, &str)] = &[$(($tag, $name)),*];
    };
}

wire_types! {
    bool => 0x01, "bool";
    i32 => 0x02, "i32";
    i64 => 0x03, "i64";
    u32 => 0x04, "u32";
    u64 => 0x05, "u64";
    f64 => 0x06, "f64", non_finite: |v: &f64| !v.is_finite();
    String => 0x07, "string";
    Vec<u8> => 0x08, "bytes";
    ConnectionState => 0x10, "connection_state";
    StateTransition => 0x11, "state_transition";
    PlayerAction => 0x20, "player_action";
    PlayerView => 0x21, "player_view";
    ClientMessage => 0x30, "client_message";
    ServerMessage => 0x31, "server_message";
}

/// Look up the type name registered for a tag.
pub fn type_name_for_tag(tag: u8) -> Option<&'static str> {
    REGISTERED_TYPES
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, name)| *name)
}
