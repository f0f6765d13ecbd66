//! Player Views
//!
//! Filtered snapshot of a game as one viewer is allowed to see it.
//! A view is built once from the authoritative game, never mutated, and
//! carries a digest the client echoes back for desync detection.

use serde::{Serialize, Deserialize};

use crate::core::hash::{ViewDigest, ViewHasher};
use crate::core::ids::{CardId, GameId, PlayerIndex};
use super::game::{AuthoritativeGame, CardSnapshot, PlayerInfo, TurnInfo, ZoneKind};
use super::perspective::{determine_perspective, PlayerPerspective};
use super::policy::{VisibilityPolicy, ZoneVisibility};

/// A card as the viewer sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibleCard {
    /// Identity revealed.
    Known(CardSnapshot),
    /// Placeholder for a card the viewer may not identify.
    FaceDown {
        /// Object id, needed for targeting.
        id: CardId,
        /// Controlling seat.
        controller: PlayerIndex,
        /// Tapped.
        tapped: bool,
    },
}

impl VisibleCard {
    /// Reveal `card` to `viewer`, redacting face-down cards they don't control.
    pub fn reveal(card: CardSnapshot, viewer: Option<PlayerIndex>) -> Self {
        if card.face_down && viewer != Some(card.controller) {
            Self::redacted(&card)
        } else {
            VisibleCard::Known(card)
        }
    }

    fn redacted(card: &CardSnapshot) -> Self {
        VisibleCard::FaceDown {
            id: card.id,
            controller: card.controller,
            tapped: card.tapped,
        }
    }

    /// Object id.
    pub fn id(&self) -> CardId {
        match self {
            VisibleCard::Known(card) => card.id,
            VisibleCard::FaceDown { id, .. } => *id,
        }
    }

    /// Full snapshot, if revealed.
    pub fn known(&self) -> Option<&CardSnapshot> {
        match self {
            VisibleCard::Known(card) => Some(card),
            VisibleCard::FaceDown { .. } => None,
        }
    }
}

/// One zone of one player, after filtering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneView {
    /// Zone kind.
    pub kind: ZoneKind,
    /// Applied visibility (`Public` or `CountOnly`).
    pub visibility: ZoneVisibility,
    /// Number of cards in the zone.
    pub count: u32,
    /// Card contents; empty unless `Public`.
    pub cards: Vec<VisibleCard>,
}

/// One player's data, after filtering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Public player data.
    pub info: PlayerInfo,
    /// Viewer's perspective toward this player.
    pub perspective: PlayerPerspective,
    /// Visible zones; hidden zones are omitted.
    pub zones: Vec<ZoneView>,
}

/// A viewer's filtered snapshot of a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Game identifier.
    pub game_id: GameId,
    /// Viewing seat; `None` for spectators.
    pub viewer: Option<PlayerIndex>,
    /// State version the view was built from.
    pub version: u64,
    /// Turn structure.
    pub turn: TurnInfo,
    /// Per-player data in seat order.
    pub players: Vec<PlayerSummary>,
    /// Stack contents, bottom first.
    pub stack: Vec<VisibleCard>,
    /// Digest over every field above.
    pub digest: ViewDigest,
}

impl PlayerView {
    /// Build a filtered view from the authoritative game.
    pub fn build(
        game: &dyn AuthoritativeGame,
        viewer: Option<PlayerIndex>,
        version: u64,
        policy: &VisibilityPolicy,
    ) -> Self {
        let players = (0..game.player_count())
            .filter_map(|index| game.player(index))
            .map(|info| {
                let perspective = determine_perspective(viewer, Some(info.index));
                let zones = ZoneKind::PLAYER_ZONES
                    .iter()
                    .filter_map(|&kind| {
                        filter_zone(game, info.index, kind, policy.visibility(kind, perspective), viewer)
                    })
                    .collect();
                PlayerSummary { info, perspective, zones }
            })
            .collect();

        let stack = game
            .stack()
            .into_iter()
            .map(|card| {
                let perspective = determine_perspective(viewer, Some(card.controller));
                match policy.visibility(ZoneKind::Stack, perspective) {
                    ZoneVisibility::Public => VisibleCard::reveal(card, viewer),
                    ZoneVisibility::CountOnly | ZoneVisibility::Hidden => VisibleCard::redacted(&card),
                }
            })
            .collect();

        let mut view = Self {
            game_id: game.game_id(),
            viewer,
            version,
            turn: game.turn(),
            players,
            stack,
            digest: [0u8; 32],
        };
        view.digest = view.compute_digest();
        view
    }

    /// Recompute the digest from the view's contents.
    pub fn compute_digest(&self) -> ViewDigest {
        let mut hasher = ViewHasher::for_player_view();
        hasher.update_bytes(self.game_id.as_bytes());
        hasher.update_option_u32(self.viewer.map(|v| v as u32));
        hasher.update_u64(self.version);

        hasher.update_u32(self.turn.number);
        hasher.update_u8(self.turn.phase.code());
        hasher.update_u32(self.turn.active_player as u32);
        hasher.update_option_u32(self.turn.priority_player.map(|p| p as u32));

        hasher.update_u32(self.players.len() as u32);
        for player in &self.players {
            hasher.update_u32(player.info.index as u32);
            hasher.update_str(&player.info.name);
            hasher.update_u32(player.info.life as u32);
            hasher.update_bool(player.info.eliminated);
            hasher.update_u8(player.perspective.code());
            hasher.update_u32(player.zones.len() as u32);
            for zone in &player.zones {
                hasher.update_str(zone.kind.as_str());
                hasher.update_u32(zone.count);
                hash_cards(&mut hasher, &zone.cards);
            }
        }

        hash_cards(&mut hasher, &self.stack);
        hasher.finalize()
    }

    /// Whether the stored digest matches the contents.
    pub fn digest_is_valid(&self) -> bool {
        self.compute_digest() == self.digest
    }

    /// A player's filtered zone, if visible.
    pub fn zone(&self, player: PlayerIndex, kind: ZoneKind) -> Option<&ZoneView> {
        self.players
            .iter()
            .find(|p| p.info.index == player)?
            .zones
            .iter()
            .find(|z| z.kind == kind)
    }

    /// Every revealed card in the view, zones first, then the stack.
    pub fn known_cards(&self) -> impl Iterator<Item = &CardSnapshot> {
        self.players
            .iter()
            .flat_map(|p| p.zones.iter())
            .flat_map(|z| z.cards.iter())
            .chain(self.stack.iter())
            .filter_map(VisibleCard::known)
    }
}

fn filter_zone(
    game: &dyn AuthoritativeGame,
    player: PlayerIndex,
    kind: ZoneKind,
    visibility: ZoneVisibility,
    viewer: Option<PlayerIndex>,
) -> Option<ZoneView> {
    // Hidden zones are never read from the game.
    if visibility == ZoneVisibility::Hidden {
        return None;
    }

    let cards = game.zone(player, kind);
    let count = cards.len() as u32;
    let cards = match visibility {
        ZoneVisibility::Public => cards
            .into_iter()
            .map(|card| VisibleCard::reveal(card, viewer))
            .collect(),
        _ => Vec::new(),
    };

    Some(ZoneView { kind, visibility, count, cards })
}

fn hash_cards(hasher: &mut ViewHasher, cards: &[VisibleCard]) {
    hasher.update_u32(cards.len() as u32);
    for card in cards {
        match card {
            VisibleCard::Known(c) => {
                hasher.update_u8(1);
                hasher.update_u32(c.id.0);
                hasher.update_str(&c.name);
                hasher.update_u32(c.owner as u32);
                hasher.update_u32(c.controller as u32);
                hasher.update_bool(c.face_down);
                hasher.update_bool(c.tapped);
            }
            VisibleCard::FaceDown { id, controller, tapped } => {
                hasher.update_u8(2);
                hasher.update_u32(id.0);
                hasher.update_u32(*controller as u32);
                hasher.update_bool(*tapped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::testing::MockGame;

    #[test]
    fn test_owner_sees_own_hand() {
        let game = MockGame::two_player();
        let view = PlayerView::build(&game, Some(0), 1, &VisibilityPolicy::standard());

        let hand = view.zone(0, ZoneKind::Hand).unwrap();
        assert_eq!(hand.visibility, ZoneVisibility::Public);
        assert_eq!(hand.count, 2);
        assert_eq!(hand.cards.len(), 2);
    }

    #[test]
    fn test_opponent_hand_is_count_only() {
        let game = MockGame::two_player();
        let view = PlayerView::build(&game, Some(0), 1, &VisibilityPolicy::standard());

        let hand = view.zone(1, ZoneKind::Hand).unwrap();
        assert_eq!(hand.visibility, ZoneVisibility::CountOnly);
        assert_eq!(hand.count, 2);
        assert!(hand.cards.is_empty());
        assert!(view.zone(1, ZoneKind::Sideboard).is_none());
    }

    #[test]
    fn test_no_hidden_identity_leaks() {
        let game = MockGame::two_player();
        for viewer in [Some(0), Some(1), None] {
            let view = PlayerView::build(&game, viewer, 1, &VisibilityPolicy::standard());
            for card in view.known_cards() {
                let (zone, _) = game.find_card(card.id).unwrap();
                let own = viewer == Some(card.owner);
                match zone {
                    ZoneKind::Library => panic!("library card {} revealed", card.name),
                    ZoneKind::Hand | ZoneKind::Sideboard => {
                        assert!(own, "{:?} saw {} in {:?}", viewer, card.name, zone)
                    }
                    _ => {}
                }
                if card.face_down {
                    assert_eq!(viewer, Some(card.controller));
                }
            }
        }
    }

    #[test]
    fn test_face_down_redacted_for_opponent() {
        let game = MockGame::two_player();
        let morph = CardId(104);

        let own = PlayerView::build(&game, Some(0), 1, &VisibilityPolicy::standard());
        let battlefield = own.zone(0, ZoneKind::Battlefield).unwrap();
        assert!(battlefield.cards.iter().any(|c| c.id() == morph && c.known().is_some()));

        let theirs = PlayerView::build(&game, Some(1), 1, &VisibilityPolicy::standard());
        let battlefield = theirs.zone(0, ZoneKind::Battlefield).unwrap();
        let card = battlefield.cards.iter().find(|c| c.id() == morph).unwrap();
        assert!(card.known().is_none());
    }

    #[test]
    fn test_spectator_view() {
        let game = MockGame::two_player();
        let view = PlayerView::build(&game, None, 1, &VisibilityPolicy::standard());
        assert!(view.players.iter().all(|p| p.perspective == PlayerPerspective::Spectator));
        assert!(view.zone(0, ZoneKind::Hand).unwrap().cards.is_empty());
    }

    #[test]
    fn test_digest_covers_contents() {
        let game = MockGame::two_player();
        let policy = VisibilityPolicy::standard();
        let a = PlayerView::build(&game, Some(0), 1, &policy);
        let b = PlayerView::build(&game, Some(0), 1, &policy);
        let c = PlayerView::build(&game, Some(1), 1, &policy);
        let d = PlayerView::build(&game, Some(0), 2, &policy);

        assert!(a.digest_is_valid());
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
        assert_ne!(a.digest, d.digest);

        let mut tampered = a.clone();
        tampered.players[0].info.life += 1;
        assert!(!tampered.digest_is_valid());
    }
}
