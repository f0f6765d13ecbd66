//! Retransmission
//!
//! Recovers from malformed payloads by asking the peer to send again.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{NetworkError, ProtocolError, RecoveryType};
use super::resync::{operation, RecoveryOperation};
use super::strategy::{
    exponential_backoff, run_attempts, RecoveryConfig, RecoveryContext, RecoveryResult, RecoveryStrategy,
};

/// Retry strategy for malformed messages.
pub struct RetransmitStrategy {
    request: RecoveryOperation,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    priority: i32,
}

impl RetransmitStrategy {
    /// Default priority.
    pub const DEFAULT_PRIORITY: i32 = 50;

    /// Create with default limits. `request` asks the peer to resend and
    /// returns `Ok(true)` once the request is out.
    pub fn new<F, Fut>(request: F) -> Self
    where
        F: Fn(RecoveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let defaults = RecoveryConfig::default();
        Self {
            request: operation(request),
            max_attempts: defaults.retransmit_max_attempts,
            base_delay: defaults.retransmit_base_delay,
            max_delay: defaults.max_backoff,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Apply limits from config.
    pub fn with_config(mut self, config: &RecoveryConfig) -> Self {
        self.max_attempts = config.retransmit_max_attempts;
        self.base_delay = config.retransmit_base_delay;
        self.max_delay = config.max_backoff;
        self
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl RecoveryStrategy for RetransmitStrategy {
    fn can_recover(&self, error: &NetworkError) -> bool {
        matches!(error, NetworkError::Protocol(ProtocolError::Malformed(_)))
    }

    async fn attempt_recovery(&self, error: &NetworkError, context: &RecoveryContext) -> RecoveryResult {
        if let NetworkError::Protocol(ProtocolError::Malformed(m)) = error {
            if m.is_size_mismatch() {
                warn!(
                    message_type = %m.message_type,
                    expected = ?m.expected_size,
                    actual = ?m.actual_size,
                    "truncated payload"
                );
            }
        }

        let request = self.request.clone();
        run_attempts("retransmit", self.max_attempts, |a| self.retry_delay(a), &context.cancel, |_| {
            request(context.clone())
        })
        .await
        .with_metadata("strategy", RecoveryType::Retry.as_str())
    }

    fn recovery_type(&self) -> RecoveryType {
        RecoveryType::Retry
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        exponential_backoff(self.base_delay, attempt, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::error::{GameStateError, MalformedMessageError};
    use crate::core::ids::GameId;

    #[test]
    fn test_applies_to_malformed_only() {
        let strategy = RetransmitStrategy::new(|_| async { Ok(true) });
        let malformed: NetworkError = MalformedMessageError::new("action", "eof").into();
        assert!(strategy.can_recover(&malformed));

        let desync = NetworkError::GameState(GameStateError {
            game_id: GameId::new([1; 16]),
            player_index: None,
            server_version: None,
            detail: String::new(),
        });
        assert!(!strategy.can_recover(&desync));
    }

    #[test]
    fn test_priority_override() {
        let strategy = RetransmitStrategy::new(|_| async { Ok(true) });
        assert_eq!(strategy.priority(), RetransmitStrategy::DEFAULT_PRIORITY);
        assert_eq!(strategy.with_priority(5).priority(), 5);
    }

    #[test]
    fn test_backoff_grows() {
        let strategy = RetransmitStrategy::new(|_| async { Ok(true) });
        assert_eq!(strategy.retry_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.retry_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.retry_delay(20), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_until_request_goes_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let strategy = RetransmitStrategy::new(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("send buffer full");
                }
                Ok(true)
            }
        })
        .with_config(&RecoveryConfig {
            retransmit_base_delay: Duration::from_millis(1),
            ..RecoveryConfig::default()
        });

        let error: NetworkError = MalformedMessageError::new("view", "bad length")
            .with_sizes(Some(40), Some(12))
            .into();
        let result = strategy.attempt_recovery(&error, &RecoveryContext::new()).await;
        assert!(result.success());
        assert_eq!(result.attempts(), Some(2));
        assert_eq!(result.metadata().get("strategy").map(String::as_str), Some("retry"));
    }
}
