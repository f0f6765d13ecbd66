//! Player Actions
//!
//! Inbound actions and the legality checks run against the authoritative
//! game before anything reaches the rules engine.

use std::collections::HashSet;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::{CardId, GameId, PlayerIndex};
use super::game::{AuthoritativeGame, Phase, Target, ZoneKind};

/// An attacker and the player it attacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackDeclaration {
    /// Attacking creature.
    pub attacker: CardId,
    /// Defending seat.
    pub defender: PlayerIndex,
}

/// A blocker and the attacker it blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeclaration {
    /// Blocking creature.
    pub blocker: CardId,
    /// Blocked attacker.
    pub attacker: CardId,
}

/// Action submitted by a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerAction {
    /// Cast or play a card from hand.
    PlayCard {
        /// Card in hand.
        card: CardId,
        /// Chosen targets.
        targets: Vec<Target>,
    },
    /// Activate an ability of a permanent.
    ActivateAbility {
        /// Source permanent.
        card: CardId,
        /// Ability index on the card.
        ability: u32,
        /// Chosen targets.
        targets: Vec<Target>,
    },
    /// Declare attackers.
    DeclareAttackers {
        /// Attack assignments.
        attackers: Vec<AttackDeclaration>,
    },
    /// Declare blockers.
    DeclareBlockers {
        /// Block assignments.
        blockers: Vec<BlockDeclaration>,
    },
    /// Pass priority.
    PassPriority,
    /// Concede the game.
    Concede,
    /// Action kind this server does not implement, forwarded by newer clients.
    Unrecognized {
        /// Client-side kind name.
        kind: String,
    },
}

impl PlayerAction {
    /// Short name for logs and telemetry.
    pub fn kind(&self) -> &str {
        match self {
            PlayerAction::PlayCard { .. } => "play_card",
            PlayerAction::ActivateAbility { .. } => "activate_ability",
            PlayerAction::DeclareAttackers { .. } => "declare_attackers",
            PlayerAction::DeclareBlockers { .. } => "declare_blockers",
            PlayerAction::PassPriority => "pass_priority",
            PlayerAction::Concede => "concede",
            PlayerAction::Unrecognized { kind } => kind.as_str(),
        }
    }
}

/// Why an action was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionDenied {
    /// No action supplied.
    #[error("missing action")]
    MissingAction,
    /// No game supplied.
    #[error("missing game id")]
    MissingGame,
    /// Game not registered.
    #[error("game {0} is not registered")]
    UnknownGame(GameId),
    /// Action kind not implemented.
    #[error("unrecognized action kind {0:?}")]
    Unrecognized(String),
    /// Seat out of range or eliminated.
    #[error("player {0} is not seated in this game")]
    NotSeated(PlayerIndex),
    /// Player does not hold priority.
    #[error("player {0} does not have priority")]
    NoPriority(PlayerIndex),
    /// Only the active player may do this.
    #[error("player {0} is not the active player")]
    NotActivePlayer(PlayerIndex),
    /// The active player may not do this.
    #[error("the active player cannot declare blockers")]
    ActivePlayer,
    /// Wrong phase for this action.
    #[error("not allowed during {0:?}")]
    WrongPhase(Phase),
    /// Card not found anywhere in the game.
    #[error("card {0} not found")]
    UnknownCard(CardId),
    /// Card is not where the action needs it.
    #[error("card {card} is not in {expected:?}")]
    WrongZone {
        /// Card.
        card: CardId,
        /// Required zone.
        expected: ZoneKind,
    },
    /// Card belongs to someone else.
    #[error("card {0} is not yours")]
    NotYourCard(CardId),
    /// Card is tapped.
    #[error("card {0} is tapped")]
    Tapped(CardId),
    /// Ability index out of range.
    #[error("card {card} has no ability {ability}")]
    NoSuchAbility {
        /// Card.
        card: CardId,
        /// Requested index.
        ability: u32,
    },
    /// Target rejected by the rules engine.
    #[error("illegal target {0:?}")]
    IllegalTarget(Target),
    /// Declaration list is empty or repeats a creature.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(&'static str),
    /// The rules engine failed while checking.
    #[error("authorization check failed internally")]
    Internal,
}

impl ActionDenied {
    /// Whether the denial suggests the client acted on stale state
    /// rather than sending something that was never legal.
    pub fn suggests_stale_view(&self) -> bool {
        matches!(
            self,
            ActionDenied::NoPriority(_)
                | ActionDenied::NotActivePlayer(_)
                | ActionDenied::ActivePlayer
                | ActionDenied::WrongPhase(_)
                | ActionDenied::UnknownCard(_)
                | ActionDenied::WrongZone { .. }
                | ActionDenied::Tapped(_)
        )
    }
}

/// Check an action against the current game state.
pub fn check_action(
    game: &dyn AuthoritativeGame,
    player: PlayerIndex,
    action: &PlayerAction,
) -> Result<(), ActionDenied> {
    match game.player(player) {
        Some(info) if !info.eliminated => {}
        _ => return Err(ActionDenied::NotSeated(player)),
    }

    let turn = game.turn();
    let has_priority = turn.priority_player == Some(player);

    match action {
        PlayerAction::Unrecognized { kind } => Err(ActionDenied::Unrecognized(kind.clone())),

        PlayerAction::Concede => Ok(()),

        PlayerAction::PassPriority => {
            if has_priority { Ok(()) } else { Err(ActionDenied::NoPriority(player)) }
        }

        PlayerAction::PlayCard { card, targets } => {
            if !has_priority {
                return Err(ActionDenied::NoPriority(player));
            }
            let snapshot = locate(game, *card, ZoneKind::Hand)?;
            if snapshot.owner != player {
                return Err(ActionDenied::NotYourCard(*card));
            }
            check_targets(game, *card, targets)
        }

        PlayerAction::ActivateAbility { card, ability, targets } => {
            if !has_priority {
                return Err(ActionDenied::NoPriority(player));
            }
            let snapshot = locate(game, *card, ZoneKind::Battlefield)?;
            if snapshot.controller != player {
                return Err(ActionDenied::NotYourCard(*card));
            }
            if *ability >= game.ability_count(*card) {
                return Err(ActionDenied::NoSuchAbility { card: *card, ability: *ability });
            }
            check_targets(game, *card, targets)
        }

        PlayerAction::DeclareAttackers { attackers } => {
            if turn.active_player != player {
                return Err(ActionDenied::NotActivePlayer(player));
            }
            if turn.phase != Phase::DeclareAttackers {
                return Err(ActionDenied::WrongPhase(turn.phase));
            }
            if attackers.is_empty() {
                return Err(ActionDenied::InvalidDeclaration("no attackers"));
            }
            let mut seen = HashSet::new();
            for decl in attackers {
                if !seen.insert(decl.attacker) {
                    return Err(ActionDenied::InvalidDeclaration("creature attacks twice"));
                }
                untapped_creature_of(game, decl.attacker, player)?;
                if decl.defender == player || decl.defender >= game.player_count() {
                    return Err(ActionDenied::IllegalTarget(Target::Player(decl.defender)));
                }
            }
            Ok(())
        }

        PlayerAction::DeclareBlockers { blockers } => {
            if turn.active_player == player {
                return Err(ActionDenied::ActivePlayer);
            }
            if turn.phase != Phase::DeclareBlockers {
                return Err(ActionDenied::WrongPhase(turn.phase));
            }
            if blockers.is_empty() {
                return Err(ActionDenied::InvalidDeclaration("no blockers"));
            }
            let mut seen = HashSet::new();
            for decl in blockers {
                if !seen.insert(decl.blocker) {
                    return Err(ActionDenied::InvalidDeclaration("creature blocks twice"));
                }
                untapped_creature_of(game, decl.blocker, player)?;
                let attacker = locate(game, decl.attacker, ZoneKind::Battlefield)?;
                if attacker.controller != turn.active_player {
                    return Err(ActionDenied::IllegalTarget(Target::Card(decl.attacker)));
                }
            }
            Ok(())
        }
    }
}

fn locate(
    game: &dyn AuthoritativeGame,
    card: CardId,
    expected: ZoneKind,
) -> Result<super::game::CardSnapshot, ActionDenied> {
    match game.find_card(card) {
        Some((zone, snapshot)) if zone == expected => Ok(snapshot),
        Some(_) => Err(ActionDenied::WrongZone { card, expected }),
        None => Err(ActionDenied::UnknownCard(card)),
    }
}

fn untapped_creature_of(
    game: &dyn AuthoritativeGame,
    card: CardId,
    player: PlayerIndex,
) -> Result<(), ActionDenied> {
    let snapshot = locate(game, card, ZoneKind::Battlefield)?;
    if snapshot.controller != player {
        return Err(ActionDenied::NotYourCard(card));
    }
    if snapshot.tapped {
        return Err(ActionDenied::Tapped(card));
    }
    Ok(())
}

fn check_targets(game: &dyn AuthoritativeGame, source: CardId, targets: &[Target]) -> Result<(), ActionDenied> {
    for target in targets {
        if let Target::Player(p) = target {
            if *p >= game.player_count() {
                return Err(ActionDenied::IllegalTarget(*target));
            }
        }
        if !game.is_legal_target(source, target) {
            return Err(ActionDenied::IllegalTarget(*target));
        }
    }
    Ok(())
}
