//! Visibility Policy
//!
//! Which zones each perspective may see, and how much of them.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use super::game::ZoneKind;
use super::perspective::PlayerPerspective;

/// How much of a zone a viewer receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneVisibility {
    /// Full card identities.
    Public,
    /// Only the number of cards.
    CountOnly,
    /// Nothing, not even the count.
    Hidden,
}

/// Visibility of one zone from each perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibilityRule {
    /// Seen by the zone's owner.
    pub owner: ZoneVisibility,
    /// Seen by other seated players.
    pub opponent: ZoneVisibility,
    /// Seen by spectators.
    pub spectator: ZoneVisibility,
}

impl VisibilityRule {
    /// Same visibility for everyone.
    pub const fn uniform(visibility: ZoneVisibility) -> Self {
        Self {
            owner: visibility,
            opponent: visibility,
            spectator: visibility,
        }
    }

    /// Visibility for one perspective.
    pub fn for_perspective(&self, perspective: PlayerPerspective) -> ZoneVisibility {
        match perspective {
            PlayerPerspective::Owner => self.owner,
            PlayerPerspective::Opponent => self.opponent,
            PlayerPerspective::Spectator => self.spectator,
        }
    }
}

/// Zone visibility table.
///
/// Zones missing from the table are hidden from everyone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibilityPolicy {
    rules: BTreeMap<ZoneKind, VisibilityRule>,
}

impl VisibilityPolicy {
    /// Policy with no rules; every zone is hidden.
    pub fn empty() -> Self {
        Self { rules: BTreeMap::new() }
    }

    /// Standard constructed-format policy.
    ///
    /// | Zone | Owner | Opponent | Spectator |
    /// |---|---|---|---|
    /// | Hand | Public | CountOnly | CountOnly |
    /// | Library | CountOnly | CountOnly | CountOnly |
    /// | Sideboard | Public | Hidden | Hidden |
    /// | everything else | Public | Public | Public |
    pub fn standard() -> Self {
        use ZoneVisibility::*;
        let public = VisibilityRule::uniform(Public);
        Self::empty()
            .with_rule(ZoneKind::Hand, VisibilityRule { owner: Public, opponent: CountOnly, spectator: CountOnly })
            .with_rule(ZoneKind::Library, VisibilityRule::uniform(CountOnly))
            .with_rule(ZoneKind::Sideboard, VisibilityRule { owner: Public, opponent: Hidden, spectator: Hidden })
            .with_rule(ZoneKind::Battlefield, public)
            .with_rule(ZoneKind::Graveyard, public)
            .with_rule(ZoneKind::Exile, public)
            .with_rule(ZoneKind::Command, public)
            .with_rule(ZoneKind::Stack, public)
    }

    /// Replace the rule for one zone.
    pub fn with_rule(mut self, zone: ZoneKind, rule: VisibilityRule) -> Self {
        self.rules.insert(zone, rule);
        self
    }

    /// Look up a zone's visibility for a perspective.
    pub fn visibility(&self, zone: ZoneKind, perspective: PlayerPerspective) -> ZoneVisibility {
        self.rules
            .get(&zone)
            .map(|rule| rule.for_perspective(perspective))
            .unwrap_or(ZoneVisibility::Hidden)
    }
}

impl Default for VisibilityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
