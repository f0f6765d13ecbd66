//! Recovery Strategy Contract
//!
//! The trait every recovery strategy implements, its context and result
//! types, and the shared attempt loop.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::ids::{ClientId, GameId};
use crate::error::{NetworkError, RecoveryType};

/// Attempt and backoff limits for the built-in strategies.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Resync attempts.
    pub resync_max_attempts: u32,
    /// Fixed delay between resync attempts.
    pub resync_delay: Duration,
    /// Retransmit attempts.
    pub retransmit_max_attempts: u32,
    /// First retransmit backoff.
    pub retransmit_base_delay: Duration,
    /// Reconnect attempts.
    pub reconnect_max_attempts: u32,
    /// First reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Upper bound for any backoff.
    pub max_backoff: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            resync_max_attempts: 2,
            resync_delay: Duration::from_millis(1000),
            retransmit_max_attempts: 3,
            retransmit_base_delay: Duration::from_millis(100),
            reconnect_max_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RecoveryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let count = |name: &str, default: u32| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        Self {
            resync_max_attempts: count("CARD_SYNC_RESYNC_ATTEMPTS", defaults.resync_max_attempts),
            resync_delay: millis("CARD_SYNC_RESYNC_DELAY_MS", defaults.resync_delay),
            retransmit_max_attempts: count("CARD_SYNC_RETRANSMIT_ATTEMPTS", defaults.retransmit_max_attempts),
            retransmit_base_delay: millis("CARD_SYNC_RETRANSMIT_DELAY_MS", defaults.retransmit_base_delay),
            reconnect_max_attempts: count("CARD_SYNC_RECONNECT_ATTEMPTS", defaults.reconnect_max_attempts),
            reconnect_base_delay: millis("CARD_SYNC_RECONNECT_DELAY_MS", defaults.reconnect_base_delay),
            max_backoff: millis("CARD_SYNC_MAX_BACKOFF_MS", defaults.max_backoff),
        }
    }
}

/// Who and what a recovery is for.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    /// Affected client.
    pub client_id: Option<ClientId>,
    /// Affected game.
    pub game_id: Option<GameId>,
    /// Cancelling interrupts any wait between attempts.
    pub cancel: CancellationToken,
}

impl RecoveryContext {
    /// Empty context with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client.
    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Set the game.
    pub fn with_game(mut self, game_id: GameId) -> Self {
        self.game_id = Some(game_id);
        self
    }

    /// Use an existing cancellation token (e.g. the server's shutdown token).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of one recovery sequence.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    success: bool,
    message: String,
    duration: Duration,
    metadata: BTreeMap<String, String>,
    cause: Option<Arc<anyhow::Error>>,
}

impl RecoveryResult {
    /// Successful outcome.
    pub fn succeeded(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            duration,
            metadata: BTreeMap::new(),
            cause: None,
        }
    }

    /// Failed outcome.
    pub fn failed(message: impl Into<String>, duration: Duration, cause: Option<anyhow::Error>) -> Self {
        Self {
            success: false,
            message: message.into(),
            duration,
            metadata: BTreeMap::new(),
            cause: cause.map(Arc::new),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Whether recovery succeeded.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Human-readable summary.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Time spent.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Extra data (`attempts`, `strategy`, ...).
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Number of attempts made, if recorded.
    pub fn attempts(&self) -> Option<u32> {
        self.metadata.get("attempts")?.parse().ok()
    }

    /// Error from the last attempt, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }
}

/// A way of recovering from some class of `NetworkError`.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Whether this strategy applies to `error`.
    fn can_recover(&self, error: &NetworkError) -> bool;

    /// Run the recovery sequence.
    async fn attempt_recovery(&self, error: &NetworkError, context: &RecoveryContext) -> RecoveryResult;

    /// Kind of recovery performed.
    fn recovery_type(&self) -> RecoveryType;

    /// Higher wins when several strategies apply.
    fn priority(&self) -> i32 {
        0
    }

    /// Attempt budget.
    fn max_attempts(&self) -> u32;

    /// Wait after failed attempt number `attempt` (1-based).
    fn retry_delay(&self, attempt: u32) -> Duration;

    /// Called after a failed sequence.
    fn on_recovery_failed(&self, _error: &NetworkError, _result: &RecoveryResult) {}

    /// Called after a successful sequence.
    fn on_recovery_succeeded(&self, _error: &NetworkError, _result: &RecoveryResult) {}
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
pub fn exponential_backoff(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Run `operation` up to `max_attempts` times.
///
/// `Ok(true)` ends the loop with success. `Ok(false)` and `Err` move on to
/// the next attempt after `delay(attempt)`; on the last attempt they end
/// with failure (carrying the error as cause). Cancellation during a wait
/// ends the loop immediately with failure.
pub(crate) async fn run_attempts<F, Fut>(
    label: &'static str,
    max_attempts: u32,
    delay: impl Fn(u32) -> Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> RecoveryResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let started = Instant::now();

    if max_attempts == 0 {
        return RecoveryResult::failed(format!("{} has no attempts configured", label), started.elapsed(), None)
            .with_metadata("attempts", 0);
    }

    let mut last_error = None;
    for attempt in 1..=max_attempts {
        trace!(strategy = label, attempt, "recovery attempt");
        match operation(attempt).await {
            Ok(true) => {
                debug!(strategy = label, attempt, "recovery succeeded");
                return RecoveryResult::succeeded(
                    format!("{} succeeded after {} attempt(s)", label, attempt),
                    started.elapsed(),
                )
                .with_metadata("attempts", attempt);
            }
            Ok(false) => last_error = None,
            Err(e) => {
                debug!(strategy = label, attempt, error = %e, "recovery attempt errored");
                last_error = Some(e);
            }
        }

        if attempt == max_attempts {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay(attempt)) => {}
            _ = cancel.cancelled() => {
                debug!(strategy = label, attempt, "recovery interrupted");
                return RecoveryResult::failed(
                    format!("{} interrupted after {} attempt(s)", label, attempt),
                    started.elapsed(),
                    last_error,
                )
                .with_metadata("attempts", attempt)
                .with_metadata("interrupted", true);
            }
        }
    }

    let message = match &last_error {
        Some(e) => format!("{} failed after {} attempt(s): {}", label, max_attempts, e),
        None => format!("{} failed after {} attempt(s)", label, max_attempts),
    };
    RecoveryResult::failed(message, started.elapsed(), last_error).with_metadata("attempts", max_attempts)
}
