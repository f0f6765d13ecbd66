//! # Card Sync
//!
//! Secure multiplayer network synchronization for turn-based card games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CARD SYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Ids and view digests                      │
//! │                                                              │
//! │  connection/     - Client lifecycle                          │
//! │  ├── state.rs    - States and the transition table           │
//! │  ├── observer.rs - Transition subscribers                    │
//! │  └── machine.rs  - Concurrent state machine, batching        │
//! │                                                              │
//! │  view/           - Hidden-information boundary               │
//! │  ├── game.rs     - Read-only rules-engine surface            │
//! │  ├── policy.rs   - Zone visibility table                     │
//! │  ├── player_view.rs - Filtered snapshots                     │
//! │  ├── action.rs   - Player actions and legality               │
//! │  └── layer.rs    - Game registry, view cache, authorization  │
//! │                                                              │
//! │  protocol/       - Wire format                               │
//! │  ├── binary.rs   - Tagged bincode codec                      │
//! │  ├── json.rs     - serde_json codec                          │
//! │  ├── compression.rs - gzip framing                           │
//! │  └── messages.rs - Client/server envelopes                   │
//! │                                                              │
//! │  recovery/       - Resync, retransmit, reconnect             │
//! │                                                              │
//! │  network/        - SyncHub and WebSocket server              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Boundary
//!
//! Clients only ever receive [`view::PlayerView`]s built by the view layer.
//! Hidden zones are never read from the rules engine when a view is built
//! for someone who may not see them, and every inbound action passes
//! [`view::SecureViewLayer::authorize_action`] before it reaches the
//! [`network::ActionSink`]. Authorization fails closed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod connection;
pub mod error;
pub mod network;
pub mod protocol;
pub mod recovery;
pub mod telemetry;
pub mod view;

// Re-export commonly used types
pub use crate::core::ids::{CardId, ClientId, GameId, PlayerIndex};
pub use config::SyncConfig;
pub use connection::{ConnectionObserver, ConnectionState, ConnectionStateMachine, StateTransition};
pub use error::{NetworkError, RecoveryType};
pub use network::{ActionSink, SyncHub, SyncServer};
pub use protocol::{AnyProtocol, BinaryProtocol, JsonProtocol, NetworkProtocol, SerializationError};
pub use recovery::{RecoveryManager, RecoveryStrategy};
pub use telemetry::{MetricsCollector, TelemetryEvent, TelemetrySink};
pub use view::{AuthoritativeGame, PlayerAction, PlayerView, SecureViewLayer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
