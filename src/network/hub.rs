//! Sync Hub
//!
//! Composes the connection state machine, the secure view layer, the wire
//! codec and the recovery manager into one message-driven service.
//!
//! The hub is transport-agnostic. Inbound frames arrive through
//! [`SyncHub::handle_frame`]; outbound frames leave through a bounded
//! channel per client registered with [`SyncHub::attach`]. Every entry
//! point that may start recovery must run inside a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::core::ids::{ClientId, GameId, PlayerIndex};
use crate::error::{MalformedMessageError, NetworkError, ProtocolError, RecoveryType, ValidationError};
use crate::protocol::{
    ActionRequest, AnyProtocol, ClientMessage, ErrorCode, HelloRequest, NetworkProtocol, ServerMessage,
    WelcomeInfo,
};
use crate::recovery::{RecoveryContext, RecoveryManager, ResyncStrategy, RetransmitStrategy};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::view::{ActionDenied, AuthoritativeGame, PlayerAction, PlayerView, SecureViewLayer, ViewError};

/// Rules-engine intake for authorized actions.
pub trait ActionSink: Send + Sync {
    /// Hand an authorized action to the rules engine.
    ///
    /// An error is reported back to the client as a rejection.
    fn submit(&self, game_id: &GameId, player: PlayerIndex, action: &PlayerAction) -> anyhow::Result<()>;
}

/// Sink that logs actions and accepts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogActions;

impl ActionSink for LogActions {
    fn submit(&self, game_id: &GameId, player: PlayerIndex, action: &PlayerAction) -> anyhow::Result<()> {
        info!(game = %game_id, player, action = action.kind(), "action accepted");
        Ok(())
    }
}

/// Hub construction errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// `CARD_SYNC_CODEC` names no known codec.
    #[error("unknown codec '{0}'")]
    UnknownCodec(String),
}

/// What the transport should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// The session now runs under a different client id.
    Rebound(ClientId),
    /// Close the link.
    Close,
}

/// Where a client sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    /// Game the client follows.
    pub game_id: GameId,
    /// Seat index, or `None` for a spectator.
    pub player: Option<PlayerIndex>,
    /// Highest view version the client acknowledged.
    pub acked_version: u64,
}

/// Encoded outbound delivery.
struct Outbox {
    links: DashMap<ClientId, mpsc::Sender<Vec<u8>>>,
    protocol: AnyProtocol,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Outbox {
    fn send(&self, client_id: &ClientId, message: &ServerMessage) -> anyhow::Result<()> {
        let frame = self
            .protocol
            .serialize_value(message)
            .with_context(|| format!("encoding {}", message.kind()))?;
        let size = frame.len();
        let link = self
            .links
            .get(client_id)
            .map(|l| l.value().clone())
            .ok_or_else(|| anyhow!("client {} has no link", client_id))?;

        link.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("outbound queue for {} is full", client_id),
            TrySendError::Closed(_) => anyhow!("link to {} is closed", client_id),
        })?;

        trace!(client = %client_id, kind = message.kind(), size, "frame queued");
        self.telemetry.record(TelemetryEvent::MessageSent {
            client_id: Some(*client_id),
            message_type: message.kind(),
            size,
        });
        Ok(())
    }
}

/// Session orchestrator.
pub struct SyncHub {
    connections: Arc<ConnectionStateMachine>,
    views: Arc<SecureViewLayer>,
    recovery: Arc<RecoveryManager>,
    outbox: Arc<Outbox>,
    seats: Arc<DashMap<ClientId, Seat>>,
    actions: Arc<dyn ActionSink>,
    telemetry: Arc<dyn TelemetrySink>,
    shutdown: CancellationToken,
    reconnect_window: Duration,
}

impl SyncHub {
    /// Build a hub and register the resync and retransmit strategies.
    pub fn new(
        config: &SyncConfig,
        actions: Arc<dyn ActionSink>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, HubError> {
        let protocol = AnyProtocol::from_config(config.protocol.clone())
            .ok_or_else(|| HubError::UnknownCodec(config.protocol.codec.clone()))?;

        let connections = Arc::new(ConnectionStateMachine::with_config(config.batching.clone(), telemetry.clone()));
        let views = Arc::new(SecureViewLayer::with_policy(config.visibility.clone(), telemetry.clone()));
        let outbox = Arc::new(Outbox {
            links: DashMap::new(),
            protocol,
            telemetry: telemetry.clone(),
        });
        let seats: Arc<DashMap<ClientId, Seat>> = Arc::new(DashMap::new());
        let recovery = Arc::new(RecoveryManager::with_telemetry(telemetry.clone()));

        let (resend_views, resend_outbox, resend_seats) = (views.clone(), outbox.clone(), seats.clone());
        recovery.register(Arc::new(
            ResyncStrategy::for_view_layer(views.clone(), move |ctx: RecoveryContext| {
                let views = resend_views.clone();
                let outbox = resend_outbox.clone();
                let seats = resend_seats.clone();
                async move {
                    let client_id = ctx.client_id.ok_or_else(|| anyhow!("resync needs a client id"))?;
                    send_full_view(&views, &outbox, &seats, &client_id)?;
                    Ok::<_, anyhow::Error>(true)
                }
            })
            .with_config(&config.recovery),
        ));

        let retransmit_outbox = outbox.clone();
        recovery.register(Arc::new(
            RetransmitStrategy::new(move |ctx: RecoveryContext| {
                let outbox = retransmit_outbox.clone();
                async move {
                    let client_id = ctx.client_id.ok_or_else(|| anyhow!("retransmit needs a client id"))?;
                    outbox.send(
                        &client_id,
                        &ServerMessage::error(ErrorCode::MalformedMessage, "payload could not be decoded, resend it"),
                    )?;
                    Ok::<_, anyhow::Error>(true)
                }
            })
            .with_config(&config.recovery),
        ));

        Ok(Self {
            connections,
            views,
            recovery,
            outbox,
            seats,
            actions,
            telemetry,
            shutdown: CancellationToken::new(),
            reconnect_window: config.server.reconnect_window,
        })
    }

    /// Connection state machine.
    pub fn connections(&self) -> &Arc<ConnectionStateMachine> {
        &self.connections
    }

    /// Secure view layer.
    pub fn views(&self) -> &Arc<SecureViewLayer> {
        &self.views
    }

    /// Recovery manager. Extra strategies may be registered here.
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// Codec in use.
    pub fn protocol(&self) -> &AnyProtocol {
        &self.outbox.protocol
    }

    /// Token cancelled by [`SyncHub::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // =========================================================================
    // GAMES AND SEATS
    // =========================================================================

    /// Register an authoritative game.
    pub fn register_game(&self, game: Arc<dyn AuthoritativeGame>) {
        self.views.register_game(game);
    }

    /// Remove a game and every seat in it.
    pub fn unregister_game(&self, game_id: &GameId) -> bool {
        self.seats.retain(|_, seat| seat.game_id != *game_id);
        self.views.unregister_game(game_id)
    }

    /// Seat a client in a game, or make it a spectator with `None`.
    pub fn seat_client(&self, client_id: ClientId, game_id: GameId, player: Option<PlayerIndex>) -> Result<(), ViewError> {
        match player {
            Some(p) => self.views.get_player_view(&game_id, p)?,
            None => self.views.get_spectator_view(&game_id)?,
        };
        self.seats.insert(client_id, Seat { game_id, player, acked_version: 0 });
        debug!(client = %client_id, game = %game_id, player = ?player, "client seated");
        Ok(())
    }

    /// Remove a client's seat.
    pub fn unseat_client(&self, client_id: &ClientId) -> Option<Seat> {
        self.seats.remove(client_id).map(|(_, seat)| seat)
    }

    /// Current seat of a client.
    pub fn seat(&self, client_id: &ClientId) -> Option<Seat> {
        self.seats.get(client_id).map(|s| *s)
    }

    /// Push a fresh view to every connected member of a game.
    ///
    /// Call after the rules engine changed the game. Returns the number of
    /// clients the view was queued for.
    pub fn publish_state(&self, game_id: &GameId) -> Result<usize, ViewError> {
        let version = self
            .views
            .invalidate_all_caches(game_id)
            .ok_or(ViewError::UnknownGame(*game_id))?;

        let members: Vec<(ClientId, Seat)> = self
            .seats
            .iter()
            .filter(|entry| entry.game_id == *game_id)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let mut delivered = 0;
        for (client_id, seat) in members {
            if self.connections.current_state(&client_id) != Some(ConnectionState::Connected) {
                continue;
            }
            match seat_view(&self.views, &seat) {
                Ok(view) => {
                    if self.send(&client_id, &ServerMessage::View(view.as_ref().clone())) {
                        delivered += 1;
                    }
                }
                Err(e) => warn!(client = %client_id, error = %e, "view unavailable"),
            }
        }

        debug!(game = %game_id, version, delivered, "state published");
        Ok(delivered)
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    /// Register a new link under a provisional id. The client starts in
    /// `Connecting` and must send `Hello` first.
    pub fn attach(&self, client_id: ClientId, link: mpsc::Sender<Vec<u8>>) {
        self.outbox.links.insert(client_id, link);
        self.connections.initialize_client(client_id, ConnectionState::Connecting);
    }

    /// The transport lost the link.
    ///
    /// Clients that finished the handshake stay known as `Disconnected`
    /// so they can resume; half-open handshakes are forgotten.
    pub fn connection_lost(&self, client_id: ClientId, reason: &str) {
        self.outbox.links.remove(&client_id);
        match self.connections.current_state(&client_id) {
            Some(ConnectionState::Connecting) => {
                self.connections.transition_state(client_id, Some(ConnectionState::Disconnected));
                self.connections.remove_client(&client_id);
                debug!(client = %client_id, reason, "handshake abandoned");
            }
            Some(ConnectionState::Connected) | Some(ConnectionState::Reconnecting) => {
                self.connections.transition_state(client_id, Some(ConnectionState::Disconnected));
                info!(client = %client_id, reason, "client disconnected");
            }
            Some(ConnectionState::Disconnected) | None => {}
        }
    }

    /// Forget clients whose reconnect window elapsed, with their seats.
    ///
    /// Returns the number of sessions removed.
    pub fn expire_sessions(&self) -> usize {
        let expired = self.connections.expire_disconnected(self.reconnect_window);
        for client_id in &expired {
            self.seats.remove(client_id);
            self.outbox.links.remove(client_id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired disconnected sessions");
        }
        expired.len()
    }

    /// Notify every link and cancel running recoveries.
    pub fn shutdown(&self, reason: &str) {
        self.shutdown.cancel();
        let clients: Vec<ClientId> = self.outbox.links.iter().map(|e| *e.key()).collect();
        for client_id in &clients {
            self.send(client_id, &ServerMessage::Shutdown { reason: reason.to_string() });
        }
        self.outbox.links.clear();
        info!(clients = clients.len(), reason, "hub shut down");
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Decode and handle one inbound frame.
    pub fn handle_frame(&self, client_id: ClientId, frame: &[u8]) -> FrameOutcome {
        let message: ClientMessage = match self.outbox.protocol.deserialize(frame) {
            Ok(message) => message,
            Err(e) => {
                self.record_received(client_id, "unknown", frame.len());
                debug!(client = %client_id, error = %e, "undecodable frame");
                let malformed = MalformedMessageError::from(e).with_sizes(None, Some(frame.len()));
                self.report(client_id, malformed.into());
                return FrameOutcome::Continue;
            }
        };
        self.record_received(client_id, message.kind(), frame.len());
        self.handle_message(client_id, message)
    }

    /// Handle one decoded message.
    pub fn handle_message(&self, client_id: ClientId, message: ClientMessage) -> FrameOutcome {
        match (self.connections.current_state(&client_id), message) {
            (None, message) => {
                warn!(client = %client_id, kind = message.kind(), "message from unknown client");
                FrameOutcome::Close
            }
            (Some(ConnectionState::Connecting), ClientMessage::Hello(hello)) => self.on_hello(client_id, hello),
            (Some(ConnectionState::Connecting), ClientMessage::Leave) => FrameOutcome::Close,
            (Some(ConnectionState::Connecting), message) => {
                debug!(client = %client_id, kind = message.kind(), "message before hello");
                self.send(&client_id, &ServerMessage::error(ErrorCode::NotConnected, "send hello first"));
                FrameOutcome::Continue
            }
            (Some(ConnectionState::Connected), message) => self.on_session_message(client_id, message),
            (Some(state), message) => {
                debug!(client = %client_id, state = state.as_str(), kind = message.kind(), "message ignored");
                FrameOutcome::Continue
            }
        }
    }

    /// Route an error to recovery. A failed or impossible recovery
    /// terminates the client's session.
    pub fn report(&self, client_id: ClientId, error: NetworkError) {
        let mut context = RecoveryContext::new()
            .with_client(client_id)
            .with_cancel(self.shutdown.child_token());
        if let Some(game_id) = error.game_id().or_else(|| self.seat(&client_id).map(|s| s.game_id)) {
            context = context.with_game(game_id);
        }

        match self.recovery.recover(error, context) {
            Ok(handle) => {
                let outbox = self.outbox.clone();
                let connections = self.connections.clone();
                tokio::spawn(async move {
                    let recovery_type = handle.recovery_type();
                    let result = handle.wait().await;
                    if !result.success() {
                        let code = match recovery_type {
                            RecoveryType::Resync => ErrorCode::StateCorrupted,
                            _ => ErrorCode::InternalError,
                        };
                        terminate(&outbox, &connections, client_id, code, result.message());
                    }
                });
            }
            Err(error) => terminate(&self.outbox, &self.connections, client_id, ErrorCode::InternalError, &error.to_string()),
        }
    }

    fn on_hello(&self, provisional: ClientId, hello: HelloRequest) -> FrameOutcome {
        let protocol = &self.outbox.protocol;
        if hello.protocol != protocol.protocol_name() || !protocol.supports_version(hello.version) {
            let mismatch = ProtocolError::VersionMismatch {
                protocol: hello.protocol.clone(),
                ours: protocol.protocol_version(),
                theirs: hello.version,
            };
            warn!(client = %provisional, error = %mismatch, "handshake refused");
            self.refuse(provisional, ErrorCode::VersionMismatch, mismatch.to_string());
            return FrameOutcome::Close;
        }

        let client_id = hello.client_id;
        if client_id != provisional && !self.rebind(provisional, client_id) {
            warn!(client = %client_id, "claimed id already connected");
            self.refuse(provisional, ErrorCode::ClientIdInUse, format!("client {} is already connected", client_id));
            return FrameOutcome::Close;
        }

        let state = self.connections.current_state(&client_id);
        let resumed = hello.resume
            && state == Some(ConnectionState::Disconnected)
            && self.connections.can_reconnect(&client_id, self.reconnect_window);
        if !resumed && state == Some(ConnectionState::Disconnected) {
            // Too late to resume: start a fresh session without the old seat.
            self.seats.remove(&client_id);
        }
        if resumed {
            self.connections.transition_state(client_id, Some(ConnectionState::Reconnecting));
        } else if state != Some(ConnectionState::Connecting) {
            self.connections.initialize_client(client_id, ConnectionState::Connecting);
        }
        self.connections.transition_state(client_id, Some(ConnectionState::Connected));
        info!(client = %client_id, resumed, "session established");

        self.send(&client_id, &ServerMessage::Welcome(self.welcome(client_id, true, resumed)));
        if resumed && self.seats.contains_key(&client_id) {
            if let Err(e) = send_full_view(&self.views, &self.outbox, &self.seats, &client_id) {
                warn!(client = %client_id, error = %e, "resume view not sent");
            }
        }

        if client_id != provisional {
            FrameOutcome::Rebound(client_id)
        } else {
            FrameOutcome::Continue
        }
    }

    fn on_session_message(&self, client_id: ClientId, message: ClientMessage) -> FrameOutcome {
        match message {
            ClientMessage::Hello(_) => {
                debug!(client = %client_id, "duplicate hello ignored");
            }
            ClientMessage::Action(request) => self.on_action(client_id, request),
            ClientMessage::SyncRequest { game_id, digest } => {
                let Some(seat) = self.seat(&client_id).filter(|s| s.game_id == game_id) else {
                    self.send(
                        &client_id,
                        &ServerMessage::error(ErrorCode::GameNotFound, format!("not joined to game {}", game_id)),
                    );
                    return FrameOutcome::Continue;
                };
                match digest {
                    None => {
                        if let Err(e) = send_full_view(&self.views, &self.outbox, &self.seats, &client_id) {
                            warn!(client = %client_id, error = %e, "requested view not sent");
                        }
                    }
                    Some(digest) => match self.views.verify_digest(&game_id, seat.player, &digest) {
                        Ok(()) => trace!(client = %client_id, "client view is current"),
                        Err(desync) => self.report(client_id, desync.into()),
                    },
                }
            }
            ClientMessage::Ack { game_id, version } => {
                if let Some(mut seat) = self.seats.get_mut(&client_id) {
                    if seat.game_id == game_id {
                        seat.acked_version = seat.acked_version.max(version);
                    }
                }
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = chrono::Utc::now().timestamp_millis().max(0) as u64;
                self.send(&client_id, &ServerMessage::Pong { timestamp, server_time });
            }
            ClientMessage::Leave => {
                self.connections.transition_state(client_id, Some(ConnectionState::Disconnected));
                self.connections.remove_client(&client_id);
                self.seats.remove(&client_id);
                info!(client = %client_id, "client left");
                return FrameOutcome::Close;
            }
        }
        FrameOutcome::Continue
    }

    fn on_action(&self, client_id: ClientId, request: ActionRequest) {
        let ActionRequest { game_id, player_index, sequence, action } = request;

        let seated = self
            .seat(&client_id)
            .map(|s| s.game_id == game_id && s.player == Some(player_index))
            .unwrap_or(false);
        let verdict = if seated {
            self.views.authorize_action(Some(&action), player_index, Some(&game_id))
        } else {
            let denied = ActionDenied::NotSeated(player_index);
            warn!(client = %client_id, game = %game_id, player = player_index, "action for a seat the client does not hold");
            self.telemetry.record(TelemetryEvent::SecurityDenial {
                game_id: Some(game_id),
                player_index,
                reason: denied.to_string(),
            });
            Err(denied)
        };

        let denied = match verdict {
            Ok(()) => match self.actions.submit(&game_id, player_index, &action) {
                Ok(()) => return,
                Err(e) => {
                    warn!(client = %client_id, game = %game_id, error = %e, "rules engine refused action");
                    self.reject(client_id, game_id, sequence, e.to_string());
                    return;
                }
            },
            Err(denied) => denied,
        };

        self.reject(client_id, game_id, sequence, denied.to_string());
        if seated && denied.suggests_stale_view() {
            self.report(
                client_id,
                ValidationError {
                    game_id: Some(game_id),
                    player_index,
                    action: action.kind().to_string(),
                    reason: denied.to_string(),
                    stale_view: true,
                }
                .into(),
            );
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn send(&self, client_id: &ClientId, message: &ServerMessage) -> bool {
        match self.outbox.send(client_id, message) {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %client_id, kind = message.kind(), error = %e, "send failed");
                false
            }
        }
    }

    fn reject(&self, client_id: ClientId, game_id: GameId, sequence: u64, reason: String) {
        self.send(&client_id, &ServerMessage::ActionRejected { game_id, sequence, reason });
    }

    /// Refuse a handshake. The provisional session never became a client
    /// that could resume, so it is dropped.
    fn refuse(&self, client_id: ClientId, code: ErrorCode, reason: String) {
        self.send(&client_id, &ServerMessage::Welcome(self.welcome(client_id, false, false)));
        self.send(&client_id, &ServerMessage::error(code, reason));
        self.connections.transition_state(client_id, Some(ConnectionState::Disconnected));
        self.connections.remove_client(&client_id);
    }

    fn welcome(&self, client_id: ClientId, accepted: bool, resumed: bool) -> WelcomeInfo {
        WelcomeInfo {
            client_id,
            protocol: self.outbox.protocol.protocol_name().to_string(),
            version: self.outbox.protocol.protocol_version(),
            accepted,
            resumed,
        }
    }

    /// Move a link to the id the client claimed. Fails if that id already
    /// has a live link.
    fn rebind(&self, from: ClientId, to: ClientId) -> bool {
        let Some(link) = self.outbox.links.get(&from).map(|l| l.value().clone()) else {
            return false;
        };
        match self.outbox.links.entry(to) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(link);
            }
        }
        self.outbox.links.remove(&from);
        self.connections.remove_client(&from);
        true
    }

    fn record_received(&self, client_id: ClientId, message_type: &'static str, size: usize) {
        self.telemetry.record(TelemetryEvent::MessageReceived {
            client_id: Some(client_id),
            message_type,
            size,
        });
    }
}

fn seat_view(views: &SecureViewLayer, seat: &Seat) -> Result<Arc<PlayerView>, ViewError> {
    match seat.player {
        Some(p) => views.get_player_view(&seat.game_id, p),
        None => views.get_spectator_view(&seat.game_id),
    }
}

fn send_full_view(
    views: &SecureViewLayer,
    outbox: &Outbox,
    seats: &DashMap<ClientId, Seat>,
    client_id: &ClientId,
) -> anyhow::Result<()> {
    let seat = seats
        .get(client_id)
        .map(|s| *s)
        .ok_or_else(|| anyhow!("client {} is not seated", client_id))?;
    let view = seat_view(views, &seat)?;
    outbox.send(client_id, &ServerMessage::Resync(view.as_ref().clone()))
}

fn terminate(
    outbox: &Outbox,
    connections: &ConnectionStateMachine,
    client_id: ClientId,
    code: ErrorCode,
    reason: &str,
) {
    error!(client = %client_id, code = ?code, reason, "terminating session");
    if let Err(e) = outbox.send(&client_id, &ServerMessage::error(code, reason)) {
        debug!(client = %client_id, error = %e, "termination notice not sent");
    }
    connections.transition_state(client_id, Some(ConnectionState::Disconnected));
    outbox.links.remove(&client_id);
}
