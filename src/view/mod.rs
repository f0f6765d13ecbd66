//! Secure View Layer
//!
//! Per-player filtered snapshots of authoritative game state, and the
//! authorization gate for inbound actions.
//!
//! - `game`: the read-only rules-engine surface
//! - `policy`: zone visibility table
//! - `player_view`: filtered snapshots and digests
//! - `action`: player actions and legality checks
//! - `layer`: game registry, view cache, authorization

pub mod game;
pub mod perspective;
pub mod policy;
pub mod player_view;
pub mod action;
pub mod layer;

#[cfg(test)]
pub(crate) mod testing;

pub use game::{AuthoritativeGame, CardSnapshot, Phase, PlayerInfo, Target, TurnInfo, ZoneKind};
pub use perspective::{determine_perspective, PlayerPerspective};
pub use policy::{VisibilityPolicy, VisibilityRule, ZoneVisibility};
pub use player_view::{PlayerSummary, PlayerView, VisibleCard, ZoneView};
pub use action::{check_action, ActionDenied, AttackDeclaration, BlockDeclaration, PlayerAction};
pub use layer::{SecureViewLayer, ViewError};
