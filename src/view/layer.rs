//! Secure View Layer
//!
//! Registry of authoritative games with per-viewer view caches and the
//! action authorization gate.
//!
//! Each game carries an atomic state version. Cached views are tagged
//! with the version they were built from and are served only while it
//! still matches; invalidation bumps the version first, so a stale view
//! is never returned even before the cache is cleared.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::hash::ViewDigest;
use crate::core::ids::{GameId, PlayerIndex};
use crate::error::GameStateError;
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
use super::action::{check_action, ActionDenied, PlayerAction};
use super::game::AuthoritativeGame;
use super::perspective::{self, PlayerPerspective};
use super::player_view::PlayerView;
use super::policy::VisibilityPolicy;

/// View layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// Game is not registered.
    #[error("game {0} is not registered")]
    UnknownGame(GameId),
    /// Seat index out of range.
    #[error("player {player} is not seated in game {game_id}")]
    UnknownPlayer {
        /// Game identifier.
        game_id: GameId,
        /// Requested seat.
        player: PlayerIndex,
    },
    /// The rules engine panicked while the view was built.
    #[error("rules engine failed while building a view of game {0}")]
    Collaborator(GameId),
}

/// Per-game secure state.
struct SecureGame {
    game: Arc<dyn AuthoritativeGame>,
    policy: Arc<VisibilityPolicy>,
    version: AtomicU64,
    views: DashMap<Option<PlayerIndex>, Arc<PlayerView>>,
}

/// Filtered-view service over registered games.
pub struct SecureViewLayer {
    games: DashMap<GameId, Arc<SecureGame>>,
    default_policy: Arc<VisibilityPolicy>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SecureViewLayer {
    /// Create a layer with the standard policy and no telemetry.
    pub fn new() -> Self {
        Self::with_policy(VisibilityPolicy::standard(), Arc::new(NoopTelemetry))
    }

    /// Create a layer with an explicit default policy and telemetry sink.
    pub fn with_policy(policy: VisibilityPolicy, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            games: DashMap::new(),
            default_policy: Arc::new(policy),
            telemetry,
        }
    }

    /// Register a game under the default policy.
    ///
    /// Re-registering an id replaces the previous game and its caches.
    pub fn register_game(&self, game: Arc<dyn AuthoritativeGame>) {
        let policy = self.default_policy.clone();
        self.insert_game(game, policy);
    }

    /// Register a game with a format-specific policy.
    pub fn register_game_with_policy(&self, game: Arc<dyn AuthoritativeGame>, policy: VisibilityPolicy) {
        self.insert_game(game, Arc::new(policy));
    }

    fn insert_game(&self, game: Arc<dyn AuthoritativeGame>, policy: Arc<VisibilityPolicy>) {
        let game_id = game.game_id();
        let secure = Arc::new(SecureGame {
            game,
            policy,
            version: AtomicU64::new(1),
            views: DashMap::new(),
        });
        if self.games.insert(game_id, secure).is_some() {
            warn!(game = %game_id, "game re-registered, previous state discarded");
        } else {
            info!(game = %game_id, "game registered");
        }
    }

    /// Remove a game. Returns false if it was not registered.
    pub fn unregister_game(&self, game_id: &GameId) -> bool {
        let removed = self.games.remove(game_id).is_some();
        if removed {
            info!(game = %game_id, "game unregistered");
        }
        removed
    }

    /// Whether a game is registered.
    pub fn is_registered(&self, game_id: &GameId) -> bool {
        self.games.contains_key(game_id)
    }

    /// Number of registered games.
    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    /// Filtered view of a game for one seat.
    pub fn get_player_view(&self, game_id: &GameId, player: PlayerIndex) -> Result<Arc<PlayerView>, ViewError> {
        let secure = self.secure_game(game_id)?;
        let seated = guarded(|| player < secure.game.player_count())
            .ok_or(ViewError::Collaborator(*game_id))?;
        if !seated {
            return Err(ViewError::UnknownPlayer { game_id: *game_id, player });
        }
        self.view_for(game_id, &secure, Some(player))
    }

    /// Filtered view of a game for a spectator.
    pub fn get_spectator_view(&self, game_id: &GameId) -> Result<Arc<PlayerView>, ViewError> {
        let secure = self.secure_game(game_id)?;
        self.view_for(game_id, &secure, None)
    }

    /// Discard every cached view of a game.
    ///
    /// Returns the new state version, or `None` if the game is unknown.
    pub fn invalidate_all_caches(&self, game_id: &GameId) -> Option<u64> {
        let secure = self.secure_game(game_id).ok()?;
        let version = secure.version.fetch_add(1, Ordering::AcqRel) + 1;
        secure.views.clear();
        debug!(game = %game_id, version, "view caches invalidated");
        self.telemetry.record(TelemetryEvent::CacheInvalidated { game_id: *game_id, version });
        Some(version)
    }

    /// Current state version of a game.
    pub fn state_version(&self, game_id: &GameId) -> Option<u64> {
        self.games
            .get(game_id)
            .map(|g| g.version.load(Ordering::Acquire))
    }

    /// Compare a client-held digest with the current view.
    pub fn verify_digest(
        &self,
        game_id: &GameId,
        player: Option<PlayerIndex>,
        digest: &ViewDigest,
    ) -> Result<(), GameStateError> {
        let view = match player {
            Some(p) => self.get_player_view(game_id, p),
            None => self.get_spectator_view(game_id),
        }
        .map_err(|e| GameStateError {
            game_id: *game_id,
            player_index: player,
            server_version: self.state_version(game_id),
            detail: e.to_string(),
        })?;

        if &view.digest == digest {
            return Ok(());
        }
        Err(GameStateError {
            game_id: *game_id,
            player_index: player,
            server_version: Some(view.version),
            detail: format!("view digest mismatch (server {})", hex::encode(&view.digest[..8])),
        })
    }

    /// Authorize an action. Fails closed.
    ///
    /// Missing inputs, unknown games, unrecognized action kinds and any
    /// panic inside the rules engine all return `false`. Denials are
    /// reported to telemetry.
    pub fn validate_action(
        &self,
        action: Option<&PlayerAction>,
        player: PlayerIndex,
        game_id: Option<&GameId>,
    ) -> bool {
        self.authorize_action(action, player, game_id).is_ok()
    }

    /// Authorize an action, reporting why it was denied.
    pub fn authorize_action(
        &self,
        action: Option<&PlayerAction>,
        player: PlayerIndex,
        game_id: Option<&GameId>,
    ) -> Result<(), ActionDenied> {
        let result = self.check(action, player, game_id);
        if let Err(denied) = &result {
            debug!(
                game = ?game_id.map(|g| g.short()),
                player,
                action = action.map(|a| a.kind()).unwrap_or("none"),
                reason = %denied,
                "action denied"
            );
            self.telemetry.record(TelemetryEvent::SecurityDenial {
                game_id: game_id.copied(),
                player_index: player,
                reason: denied.to_string(),
            });
        }
        result
    }

    /// Perspective of `viewer` toward `target`.
    pub fn determine_perspective(
        &self,
        viewer: Option<PlayerIndex>,
        target: Option<PlayerIndex>,
    ) -> PlayerPerspective {
        perspective::determine_perspective(viewer, target)
    }

    fn check(
        &self,
        action: Option<&PlayerAction>,
        player: PlayerIndex,
        game_id: Option<&GameId>,
    ) -> Result<(), ActionDenied> {
        let action = action.ok_or(ActionDenied::MissingAction)?;
        let game_id = game_id.ok_or(ActionDenied::MissingGame)?;
        let secure = self
            .secure_game(game_id)
            .map_err(|_| ActionDenied::UnknownGame(*game_id))?;

        guarded(|| check_action(secure.game.as_ref(), player, action))
            .unwrap_or(Err(ActionDenied::Internal))
    }

    fn secure_game(&self, game_id: &GameId) -> Result<Arc<SecureGame>, ViewError> {
        self.games
            .get(game_id)
            .map(|entry| entry.value().clone())
            .ok_or(ViewError::UnknownGame(*game_id))
    }

    fn view_for(
        &self,
        game_id: &GameId,
        secure: &SecureGame,
        viewer: Option<PlayerIndex>,
    ) -> Result<Arc<PlayerView>, ViewError> {
        let version = secure.version.load(Ordering::Acquire);
        if let Some(cached) = secure.views.get(&viewer) {
            if cached.version == version {
                return Ok(cached.value().clone());
            }
        }

        let started = Instant::now();
        let view = guarded(|| PlayerView::build(secure.game.as_ref(), viewer, version, &secure.policy))
            .ok_or(ViewError::Collaborator(*game_id))?;
        let view = Arc::new(view);
        self.telemetry.record(TelemetryEvent::Performance {
            operation: "build_player_view",
            duration: started.elapsed(),
        });

        // Only publish if no invalidation happened while building.
        if secure.version.load(Ordering::Acquire) == version {
            secure.views.insert(viewer, view.clone());
        }
        Ok(view)
    }
}

impl Default for SecureViewLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a rules-engine call, turning a panic into `None`.
fn guarded<T>(f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("rules engine panicked during a sync-layer call");
            None
        }
    }
}
