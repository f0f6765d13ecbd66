//! Viewer Perspective

use serde::{Serialize, Deserialize};

use crate::core::ids::PlayerIndex;

/// Relationship between a viewer and the player whose data is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerPerspective {
    /// Viewer is that player.
    Owner,
    /// Viewer is another seated player.
    Opponent,
    /// Viewer is not seated, or the target is unknown.
    Spectator,
}

impl PlayerPerspective {
    /// Numeric code used in view digests.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Compute the perspective of `viewer` toward `target`.
///
/// A missing identity on either side yields `Spectator`.
pub fn determine_perspective(viewer: Option<PlayerIndex>, target: Option<PlayerIndex>) -> PlayerPerspective {
    match (viewer, target) {
        (Some(v), Some(t)) if v == t => PlayerPerspective::Owner,
        (Some(_), Some(_)) => PlayerPerspective::Opponent,
        _ => PlayerPerspective::Spectator,
    }
}
