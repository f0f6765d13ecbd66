//! Network Layer
//!
//! Session orchestration and the WebSocket transport.
//! All security decisions are made in `view/`; this layer only routes.

pub mod hub;
pub mod server;

pub use hub::{ActionSink, FrameOutcome, HubError, LogActions, Seat, SyncHub};
pub use server::{ServerConfig, SyncServer, SyncServerError};
