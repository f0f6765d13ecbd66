//! Authoritative Game Surface
//!
//! Read-only interface the rules engine exposes to the sync layer, plus
//! the plain data it hands back.

use serde::{Serialize, Deserialize};

use crate::core::ids::{CardId, GameId, PlayerIndex};

/// Card zones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZoneKind {
    /// Cards in hand.
    Hand,
    /// Draw pile.
    Library,
    /// Permanents in play.
    Battlefield,
    /// Discard pile.
    Graveyard,
    /// Removed from the game.
    Exile,
    /// Commander zone.
    Command,
    /// Cards outside the game.
    Sideboard,
    /// Shared spell stack.
    Stack,
}

impl ZoneKind {
    /// Zones owned by each player, in view order.
    pub const PLAYER_ZONES: [ZoneKind; 7] = [
        ZoneKind::Hand,
        ZoneKind::Library,
        ZoneKind::Battlefield,
        ZoneKind::Graveyard,
        ZoneKind::Exile,
        ZoneKind::Command,
        ZoneKind::Sideboard,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Hand => "hand",
            ZoneKind::Library => "library",
            ZoneKind::Battlefield => "battlefield",
            ZoneKind::Graveyard => "graveyard",
            ZoneKind::Exile => "exile",
            ZoneKind::Command => "command",
            ZoneKind::Sideboard => "sideboard",
            ZoneKind::Stack => "stack",
        }
    }
}

/// Turn phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Untap step.
    Untap,
    /// Upkeep step.
    Upkeep,
    /// Draw step.
    Draw,
    /// First main phase.
    PrecombatMain,
    /// Beginning of combat.
    BeginCombat,
    /// Attackers are declared.
    DeclareAttackers,
    /// Blockers are declared.
    DeclareBlockers,
    /// Combat damage.
    CombatDamage,
    /// End of combat.
    EndCombat,
    /// Second main phase.
    PostcombatMain,
    /// End step.
    End,
    /// Cleanup step.
    Cleanup,
}

impl Phase {
    /// Numeric code used in view digests.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Full information about one card object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSnapshot {
    /// Card object id.
    pub id: CardId,
    /// Card name.
    pub name: String,
    /// Owning seat.
    pub owner: PlayerIndex,
    /// Controlling seat.
    pub controller: PlayerIndex,
    /// Face-down (morph, manifest, hidden exile).
    pub face_down: bool,
    /// Tapped.
    pub tapped: bool,
}

/// Per-player public data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Seat index.
    pub index: PlayerIndex,
    /// Display name.
    pub name: String,
    /// Life total.
    pub life: i32,
    /// Player has lost or conceded.
    pub eliminated: bool,
}

/// Turn structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInfo {
    /// Turn number (1-based).
    pub number: u32,
    /// Current phase.
    pub phase: Phase,
    /// Player whose turn it is.
    pub active_player: PlayerIndex,
    /// Player holding priority, if any.
    pub priority_player: Option<PlayerIndex>,
}

/// Something an action can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// A player seat.
    Player(PlayerIndex),
    /// A card object.
    Card(CardId),
}

/// Read-only view of a game owned by the rules engine.
///
/// Calls may happen from any thread and must not block for long. The
/// sync layer never holds its own locks while calling in.
pub trait AuthoritativeGame: Send + Sync {
    /// Game identifier.
    fn game_id(&self) -> GameId;

    /// Number of seats.
    fn player_count(&self) -> usize;

    /// Public data for a seat.
    fn player(&self, index: PlayerIndex) -> Option<PlayerInfo>;

    /// Cards in a player's zone, in zone order. `ZoneKind::Stack` is
    /// served by [`AuthoritativeGame::stack`] instead.
    fn zone(&self, player: PlayerIndex, zone: ZoneKind) -> Vec<CardSnapshot>;

    /// Stack contents, bottom first.
    fn stack(&self) -> Vec<CardSnapshot>;

    /// Current turn structure.
    fn turn(&self) -> TurnInfo;

    /// Number of activated abilities a card has.
    fn ability_count(&self, card: CardId) -> u32;

    /// Whether `target` is a legal choice for something `source` does.
    fn is_legal_target(&self, source: CardId, target: &Target) -> bool;

    /// Locate a card object.
    fn find_card(&self, card: CardId) -> Option<(ZoneKind, CardSnapshot)> {
        if let Some(found) = self.stack().into_iter().find(|c| c.id == card) {
            return Some((ZoneKind::Stack, found));
        }
        for player in 0..self.player_count() {
            for zone in ZoneKind::PLAYER_ZONES {
                if let Some(found) = self.zone(player, zone).into_iter().find(|c| c.id == card) {
                    return Some((zone, found));
                }
            }
        }
        None
    }

    /// Owner of a card.
    fn card_owner(&self, card: CardId) -> Option<PlayerIndex> {
        self.find_card(card).map(|(_, c)| c.owner)
    }

    /// Controller of a card.
    fn card_controller(&self, card: CardId) -> Option<PlayerIndex> {
        self.find_card(card).map(|(_, c)| c.controller)
    }
}
