//! Telemetry
//!
//! Write-only event interface consumed by every layer.
//! Sinks are injected at construction time; nothing here is global.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::ids::{ClientId, GameId, PlayerIndex};

/// Structured telemetry events.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// A client started (or restarted) connecting.
    ConnectionAttempt {
        /// Client identifier.
        client_id: ClientId,
    },
    /// A client reached the connected state.
    Connected {
        /// Client identifier.
        client_id: ClientId,
    },
    /// A client lost its connection.
    Disconnection {
        /// Client identifier.
        client_id: ClientId,
    },
    /// A reconnection attempt began.
    ReconnectAttempt {
        /// Client identifier.
        client_id: ClientId,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Outbound message.
    MessageSent {
        /// Recipient, if addressed to a single client.
        client_id: Option<ClientId>,
        /// Wire type name.
        message_type: &'static str,
        /// Encoded size in bytes (after compression).
        size: usize,
    },
    /// Inbound message.
    MessageReceived {
        /// Sender, if known.
        client_id: Option<ClientId>,
        /// Wire type name.
        message_type: &'static str,
        /// Encoded size in bytes (before decompression).
        size: usize,
    },
    /// Outcome of a state synchronization.
    StateSync {
        /// Game identifier.
        game_id: GameId,
        /// Whether the resync succeeded.
        success: bool,
        /// Time spent.
        duration: Duration,
    },
    /// A player action was denied.
    SecurityDenial {
        /// Game identifier, if one was supplied.
        game_id: Option<GameId>,
        /// Seat that submitted the action.
        player_index: PlayerIndex,
        /// Human-readable reason.
        reason: String,
    },
    /// Cached views for a game were discarded.
    CacheInvalidated {
        /// Game identifier.
        game_id: GameId,
        /// State version after the bump.
        version: u64,
    },
    /// Timing of a bounded operation.
    Performance {
        /// Operation name.
        operation: &'static str,
        /// Elapsed time.
        duration: Duration,
    },
}

/// Fire-and-forget event sink.
///
/// Implementations must not block: they are called inline from
/// connection and view-filtering paths.
pub trait TelemetrySink: Send + Sync {
    /// Record one event.
    fn record(&self, event: TelemetryEvent);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::ConnectionAttempt { client_id } => {
                info!(client = %client_id, "connection attempt");
            }
            TelemetryEvent::Connected { client_id } => {
                info!(client = %client_id, "client connected");
            }
            TelemetryEvent::Disconnection { client_id } => {
                info!(client = %client_id, "client disconnected");
            }
            TelemetryEvent::ReconnectAttempt { client_id, attempt } => {
                info!(client = %client_id, attempt, "reconnect attempt");
            }
            TelemetryEvent::MessageSent { client_id, message_type, size } => {
                debug!(client = ?client_id.map(|c| c.short()), message_type, size, "message sent");
            }
            TelemetryEvent::MessageReceived { client_id, message_type, size } => {
                debug!(client = ?client_id.map(|c| c.short()), message_type, size, "message received");
            }
            TelemetryEvent::StateSync { game_id, success, duration } => {
                if success {
                    info!(game = %game_id, ?duration, "state sync succeeded");
                } else {
                    warn!(game = %game_id, ?duration, "state sync failed");
                }
            }
            TelemetryEvent::SecurityDenial { game_id, player_index, reason } => {
                warn!(game = ?game_id.map(|g| g.short()), player_index, %reason, "action denied");
            }
            TelemetryEvent::CacheInvalidated { game_id, version } => {
                debug!(game = %game_id, version, "view caches invalidated");
            }
            TelemetryEvent::Performance { operation, duration } => {
                debug!(operation, ?duration, "timing");
            }
        }
    }
}

/// Sink that forwards to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

/// In-memory counters.
///
/// One instance per server (or per test); counters are never shared
/// across unrelated collectors.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    connection_attempts: AtomicU64,
    connections: AtomicU64,
    disconnections: AtomicU64,
    reconnect_attempts: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    syncs_succeeded: AtomicU64,
    syncs_failed: AtomicU64,
    security_denials: AtomicU64,
    cache_invalidations: AtomicU64,
}

/// Point-in-time copy of [`MetricsCollector`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connection attempts.
    pub connection_attempts: u64,
    /// Successful connections.
    pub connections: u64,
    /// Disconnections.
    pub disconnections: u64,
    /// Reconnect attempts.
    pub reconnect_attempts: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Successful state syncs.
    pub syncs_succeeded: u64,
    /// Failed state syncs.
    pub syncs_failed: u64,
    /// Denied actions.
    pub security_denials: u64,
    /// Cache invalidations.
    pub cache_invalidations: u64,
}

impl MetricsCollector {
    /// Create a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            connection_attempts: load(&self.connection_attempts),
            connections: load(&self.connections),
            disconnections: load(&self.disconnections),
            reconnect_attempts: load(&self.reconnect_attempts),
            messages_sent: load(&self.messages_sent),
            bytes_sent: load(&self.bytes_sent),
            messages_received: load(&self.messages_received),
            bytes_received: load(&self.bytes_received),
            syncs_succeeded: load(&self.syncs_succeeded),
            syncs_failed: load(&self.syncs_failed),
            security_denials: load(&self.security_denials),
            cache_invalidations: load(&self.cache_invalidations),
        }
    }
}

impl TelemetrySink for MetricsCollector {
    fn record(&self, event: TelemetryEvent) {
        let bump = |c: &AtomicU64, by: u64| {
            c.fetch_add(by, Ordering::Relaxed);
        };
        match event {
            TelemetryEvent::ConnectionAttempt { .. } => bump(&self.connection_attempts, 1),
            TelemetryEvent::Connected { .. } => bump(&self.connections, 1),
            TelemetryEvent::Disconnection { .. } => bump(&self.disconnections, 1),
            TelemetryEvent::ReconnectAttempt { .. } => bump(&self.reconnect_attempts, 1),
            TelemetryEvent::MessageSent { size, .. } => {
                bump(&self.messages_sent, 1);
                bump(&self.bytes_sent, size as u64);
            }
            TelemetryEvent::MessageReceived { size, .. } => {
                bump(&self.messages_received, 1);
                bump(&self.bytes_received, size as u64);
            }
            TelemetryEvent::StateSync { success: true, .. } => bump(&self.syncs_succeeded, 1),
            TelemetryEvent::StateSync { success: false, .. } => bump(&self.syncs_failed, 1),
            TelemetryEvent::SecurityDenial { .. } => bump(&self.security_denials, 1),
            TelemetryEvent::CacheInvalidated { .. } => bump(&self.cache_invalidations, 1),
            TelemetryEvent::Performance { .. } => {}
        }
    }
}
