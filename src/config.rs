//! Configuration
//!
//! Aggregates the per-component settings. Every section has a `Default`
//! and a `from_env()` reading `CARD_SYNC_*` variables.

use crate::connection::BatchingConfig;
use crate::network::ServerConfig;
use crate::protocol::ProtocolConfig;
use crate::recovery::RecoveryConfig;
use crate::view::VisibilityPolicy;

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Codec choice, compression and size limits.
    pub protocol: ProtocolConfig,
    /// Recovery attempt budgets and delays.
    pub recovery: RecoveryConfig,
    /// Observer batching.
    pub batching: BatchingConfig,
    /// Default zone visibility for registered games.
    pub visibility: VisibilityPolicy,
    /// WebSocket transport.
    pub server: ServerConfig,
}

impl SyncConfig {
    /// Create config from environment variables.
    ///
    /// The visibility table is not environment-driven; it stays at the
    /// standard policy.
    pub fn from_env() -> Self {
        Self {
            protocol: ProtocolConfig::from_env(),
            recovery: RecoveryConfig::from_env(),
            batching: BatchingConfig::from_env(),
            visibility: VisibilityPolicy::standard(),
            server: ServerConfig::from_env(),
        }
    }
}
