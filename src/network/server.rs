//! WebSocket Sync Server
//!
//! Async WebSocket transport in front of a [`SyncHub`].
//! Each link gets a provisional client id, a bounded outbound queue drained
//! by a writer task, and a reader loop that feeds frames to the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::ConnectionState;
use crate::core::ids::ClientId;
use crate::protocol::{NetworkProtocol, JSON_PROTOCOL_NAME};
use super::hub::{FrameOutcome, SyncHub};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent links.
    pub max_connections: usize,
    /// Outbound frames buffered per link before sends fail.
    pub outbound_queue: usize,
    /// Time allowed for the WebSocket upgrade and for `Hello` to arrive.
    pub handshake_timeout: Duration,
    /// How often buffered transition batches and expired sessions are swept.
    pub flush_interval: Duration,
    /// How long a dropped client may resume before its session is reaped.
    pub reconnect_window: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_queue: 64,
            handshake_timeout: Duration::from_secs(10),
            flush_interval: Duration::from_millis(25),
            reconnect_window: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("CARD_SYNC_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("CARD_SYNC_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            outbound_queue: std::env::var("CARD_SYNC_OUTBOUND_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.outbound_queue),
            handshake_timeout: std::env::var("CARD_SYNC_HANDSHAKE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.handshake_timeout),
            flush_interval: std::env::var("CARD_SYNC_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            reconnect_window: std::env::var("CARD_SYNC_RECONNECT_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_window),
            version: defaults.version,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Decrements the live-link counter when a connection task ends.
struct LinkGuard(Arc<AtomicUsize>);

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<SyncHub>,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl SyncServer {
    /// Create a server over `hub`.
    pub fn new(config: ServerConfig, hub: Arc<SyncHub>) -> Self {
        Self {
            config,
            hub,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// The hub frames are routed to.
    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    /// Cancel to stop the server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of open links.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Bind and run until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), SyncServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Sync server v{} listening on {}", self.config.version, self.config.bind_addr);
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SyncServerError> {
        let hub = self.hub.clone();
        let flush_interval = self.config.flush_interval;
        let sweep_handle = tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            loop {
                ticker.tick().await;
                hub.connections().flush_expired();
                hub.expire_sessions();
            }
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.active_connections() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.hub.shutdown("server shutting down");
        sweep_handle.abort();
        self.hub.connections().flush_all();
        Ok(())
    }

    /// Spawn the reader and writer tasks for one link.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = self.hub.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = LinkGuard(self.active.clone());

        tokio::spawn(async move {
            let _guard = guard;
            let ws_stream = match timeout(config.handshake_timeout, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake timed out for {}", addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(config.outbound_queue);
            let text_frames = hub.protocol().protocol_name() == JSON_PROTOCOL_NAME;
            let protocol = hub.protocol().clone();

            let mut client_id = ClientId::random();
            hub.attach(client_id, frame_tx);
            debug!(client = %client_id, %addr, "link attached");

            // Drains until the hub drops the sending side.
            let mut writer = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    let message = if text_frames && !protocol.is_compressed(&frame) {
                        match String::from_utf8(frame) {
                            Ok(text) => Message::Text(text),
                            Err(e) => Message::Binary(e.into_bytes()),
                        }
                    } else {
                        Message::Binary(frame)
                    };
                    if ws_sender.send(message).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.send(Message::Close(None)).await;
            });
            let mut writer_done = false;

            let hello_deadline = tokio::time::sleep(config.handshake_timeout);
            tokio::pin!(hello_deadline);
            let mut established = false;

            let reason = loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let outcome = match msg {
                            Some(Ok(Message::Binary(data))) => hub.handle_frame(client_id, &data),
                            Some(Ok(Message::Text(text))) => hub.handle_frame(client_id, text.as_bytes()),
                            Some(Ok(Message::Close(_))) | None => break "closed by peer",
                            Some(Err(e)) => {
                                debug!(client = %client_id, "WebSocket error: {}", e);
                                break "transport error";
                            }
                            Some(Ok(_)) => continue,
                        };
                        match outcome {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Rebound(id) => {
                                debug!(from = %client_id, to = %id, "link rebound");
                                client_id = id;
                            }
                            FrameOutcome::Close => break "closed by server",
                        }
                        established = established
                            || hub.connections().current_state(&client_id) == Some(ConnectionState::Connected);
                    }
                    _ = &mut writer, if !writer_done => {
                        writer_done = true;
                        break "outbound link closed";
                    }
                    _ = &mut hello_deadline, if !established => {
                        break "hello timeout";
                    }
                    _ = shutdown.cancelled() => {
                        break "server shutting down";
                    }
                }
            };

            // Dropping the hub's sender lets the writer flush and close.
            hub.connection_lost(client_id, reason);
            if !writer_done && timeout(Duration::from_secs(1), &mut writer).await.is_err() {
                writer.abort();
            }
            info!(client = %client_id, %addr, reason, "link closed");
        });
    }
}
