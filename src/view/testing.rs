//! In-memory game used by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;

use crate::core::ids::{CardId, GameId, PlayerIndex};
use super::game::{AuthoritativeGame, CardSnapshot, Phase, PlayerInfo, Target, TurnInfo, ZoneKind};

struct MockState {
    players: Vec<PlayerInfo>,
    zones: BTreeMap<(PlayerIndex, ZoneKind), Vec<CardSnapshot>>,
    stack: Vec<CardSnapshot>,
    turn: TurnInfo,
    abilities: BTreeMap<CardId, u32>,
}

pub(crate) struct MockGame {
    id: GameId,
    state: Mutex<MockState>,
    panic: AtomicBool,
}

fn card(id: u32, name: &str, owner: PlayerIndex) -> CardSnapshot {
    CardSnapshot {
        id: CardId(id),
        name: name.to_string(),
        owner,
        controller: owner,
        face_down: false,
        tapped: false,
    }
}

impl MockGame {
    /// Two seats, player 0 active with priority in the first main phase.
    ///
    /// Player 0: hand 101-102, library 110-112, battlefield 103 (bears),
    /// 104 (face-down), 105 (tapped elves), graveyard 107, sideboard 106.
    /// Player 1: hand 201-202, library 210-211, battlefield 203, sideboard 206.
    pub(crate) fn two_player() -> Self {
        let mut zones = BTreeMap::new();
        zones.insert((0, ZoneKind::Hand), vec![card(101, "Lightning Bolt", 0), card(102, "Counterspell", 0)]);
        zones.insert((0, ZoneKind::Library), vec![card(110, "Island", 0), card(111, "Mountain", 0), card(112, "Forest", 0)]);
        zones.insert(
            (0, ZoneKind::Battlefield),
            vec![
                card(103, "Grizzly Bears", 0),
                CardSnapshot { face_down: true, ..card(104, "Exalted Angel", 0) },
                CardSnapshot { tapped: true, ..card(105, "Llanowar Elves", 0) },
            ],
        );
        zones.insert((0, ZoneKind::Graveyard), vec![card(107, "Shock", 0)]);
        zones.insert((0, ZoneKind::Sideboard), vec![card(106, "Pyroblast", 0)]);
        zones.insert((1, ZoneKind::Hand), vec![card(201, "Giant Growth", 1), card(202, "Dark Ritual", 1)]);
        zones.insert((1, ZoneKind::Library), vec![card(210, "Swamp", 1), card(211, "Plains", 1)]);
        zones.insert((1, ZoneKind::Battlefield), vec![card(203, "Serra Angel", 1)]);
        zones.insert((1, ZoneKind::Sideboard), vec![card(206, "Disenchant", 1)]);

        let mut abilities = BTreeMap::new();
        abilities.insert(CardId(105), 1);

        Self {
            id: GameId::new([7; 16]),
            state: Mutex::new(MockState {
                players: vec![
                    PlayerInfo { index: 0, name: "alice".into(), life: 20, eliminated: false },
                    PlayerInfo { index: 1, name: "bob".into(), life: 20, eliminated: false },
                ],
                zones,
                stack: Vec::new(),
                turn: TurnInfo {
                    number: 3,
                    phase: Phase::PrecombatMain,
                    active_player: 0,
                    priority_player: Some(0),
                },
                abilities,
            }),
            panic: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_turn(&self, turn: TurnInfo) {
        self.state.lock().turn = turn;
    }

    pub(crate) fn set_life(&self, player: PlayerIndex, life: i32) {
        self.state.lock().players[player].life = life;
    }

    pub(crate) fn push_stack(&self, card: CardSnapshot) {
        self.state.lock().stack.push(card);
    }

    pub(crate) fn set_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    fn check_panic(&self) {
        if self.panic.load(Ordering::SeqCst) {
            panic!("rules engine failure");
        }
    }
}

impl AuthoritativeGame for MockGame {
    fn game_id(&self) -> GameId {
        self.id
    }

    fn player_count(&self) -> usize {
        self.state.lock().players.len()
    }

    fn player(&self, index: PlayerIndex) -> Option<PlayerInfo> {
        self.state.lock().players.get(index).cloned()
    }

    fn zone(&self, player: PlayerIndex, zone: ZoneKind) -> Vec<CardSnapshot> {
        self.check_panic();
        self.state.lock().zones.get(&(player, zone)).cloned().unwrap_or_default()
    }

    fn stack(&self) -> Vec<CardSnapshot> {
        self.state.lock().stack.clone()
    }

    fn turn(&self) -> TurnInfo {
        self.check_panic();
        self.state.lock().turn
    }

    fn ability_count(&self, card: CardId) -> u32 {
        self.state.lock().abilities.get(&card).copied().unwrap_or(0)
    }

    fn is_legal_target(&self, _source: CardId, target: &Target) -> bool {
        match target {
            Target::Player(p) => *p < self.player_count(),
            Target::Card(c) => matches!(self.find_card(*c), Some((ZoneKind::Battlefield, _))),
        }
    }
}
