//! Reconnection
//!
//! Restores a lost link, driving the client through the connection state
//! machine: Reconnecting while attempts run, then Connected on success or
//! Disconnected once the budget is spent.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::error::{NetworkError, RecoveryType};
use super::resync::{operation, RecoveryOperation};
use super::strategy::{
    exponential_backoff, run_attempts, RecoveryConfig, RecoveryContext, RecoveryResult, RecoveryStrategy,
};

/// Reconnect strategy for lost or timed-out links.
pub struct ReconnectStrategy {
    connections: Arc<ConnectionStateMachine>,
    reconnect: RecoveryOperation,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    priority: i32,
}

impl ReconnectStrategy {
    /// Default priority.
    pub const DEFAULT_PRIORITY: i32 = 80;

    /// Create with default limits. `reconnect` re-establishes the link and
    /// returns `Ok(true)` once it is usable.
    pub fn new<F, Fut>(connections: Arc<ConnectionStateMachine>, reconnect: F) -> Self
    where
        F: Fn(RecoveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let defaults = RecoveryConfig::default();
        Self {
            connections,
            reconnect: operation(reconnect),
            max_attempts: defaults.reconnect_max_attempts,
            base_delay: defaults.reconnect_base_delay,
            max_delay: defaults.max_backoff,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Apply limits from config.
    pub fn with_config(mut self, config: &RecoveryConfig) -> Self {
        self.max_attempts = config.reconnect_max_attempts;
        self.base_delay = config.reconnect_base_delay;
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
impl RecoveryStrategy for ReconnectStrategy {
    fn can_recover(&self, error: &NetworkError) -> bool {
        matches!(error, NetworkError::Connection(_)) && error.recommended_strategy() == RecoveryType::Reconnect
    }

    async fn attempt_recovery(&self, error: &NetworkError, context: &RecoveryContext) -> RecoveryResult {
        let started = Instant::now();
        let Some(client_id) = context.client_id.or_else(|| error.client_id()) else {
            return RecoveryResult::failed("reconnect needs a client id", started.elapsed(), None)
                .with_metadata("attempts", 0);
        };

        match self.connections.current_state(&client_id) {
            Some(ConnectionState::Reconnecting) => {}
            Some(state) => {
                if !self.connections.transition_state(client_id, Some(ConnectionState::Reconnecting)) {
                    return RecoveryResult::failed(
                        format!("client {} cannot reconnect from {}", client_id, state.as_str()),
                        started.elapsed(),
                        None,
                    )
                    .with_metadata("attempts", 0);
                }
            }
            None => {
                return RecoveryResult::failed(format!("client {} is unknown", client_id), started.elapsed(), None)
                    .with_metadata("attempts", 0);
            }
        }

        let reconnect = self.reconnect.clone();
        let context = context.clone().with_client(client_id);
        let result = run_attempts("reconnect", self.max_attempts, |a| self.retry_delay(a), &context.cancel, |_| {
            reconnect(context.clone())
        })
        .await
        .with_metadata("strategy", RecoveryType::Reconnect.as_str());

        let target = if result.success() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        if !self.connections.transition_state(client_id, Some(target)) {
            warn!(client = %client_id, to = target.as_str(), "client changed state during reconnect");
        }
        result
    }

    fn recovery_type(&self) -> RecoveryType {
        RecoveryType::Reconnect
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

    fn on_recovery_succeeded(&self, error: &NetworkError, result: &RecoveryResult) {
        if let NetworkError::Connection(e) = error {
            info!(client = %e.client_id(), attempts = ?result.attempts(), "link restored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::connection::TransitionLog;
    use crate::core::ids::ClientId;
    use crate::error::ConnectionError;

    fn setup(state: ConnectionState) -> (Arc<ConnectionStateMachine>, Arc<TransitionLog>, ClientId) {
        let machine = Arc::new(ConnectionStateMachine::new());
        let log = Arc::new(TransitionLog::new());
        machine.add_observer(log.clone());
        let id = ClientId::new([4; 16]);
        machine.initialize_client(id, state);
        (machine, log, id)
    }

    fn fast() -> RecoveryConfig {
        RecoveryConfig {
            reconnect_max_attempts: 3,
            reconnect_base_delay: Duration::from_millis(1),
            ..RecoveryConfig::default()
        }
    }

    fn lost(client_id: ClientId) -> NetworkError {
        ConnectionError::Lost { client_id, reason: "reset by peer".into() }.into()
    }

    #[test]
    fn test_priority_override() {
        let (machine, _, _) = setup(ConnectionState::Disconnected);
        let strategy = ReconnectStrategy::new(machine, |_| async { Ok(true) });
        assert_eq!(strategy.priority(), ReconnectStrategy::DEFAULT_PRIORITY);
        assert_eq!(strategy.with_priority(-1).priority(), -1);
    }

    #[tokio::test]
    async fn test_reconnect_success_path() {
        let (machine, log, id) = setup(ConnectionState::Disconnected);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let strategy = ReconnectStrategy::new(machine.clone(), move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 1) }
        })
        .with_config(&fast());

        let result = strategy.attempt_recovery(&lost(id), &RecoveryContext::new()).await;
        assert!(result.success());
        assert_eq!(result.attempts(), Some(2));
        assert_eq!(machine.current_state(&id), Some(ConnectionState::Connected));

        let path: Vec<_> = log.transitions().iter().map(|t| t.to()).collect();
        assert_eq!(path, vec![ConnectionState::Reconnecting, ConnectionState::Connected]);
    }

    #[tokio::test]
    async fn test_reconnect_exhausted() {
        let (machine, _, id) = setup(ConnectionState::Connected);
        let strategy = ReconnectStrategy::new(machine.clone(), |_| async { Ok(false) }).with_config(&fast());

        let result = strategy.attempt_recovery(&lost(id), &RecoveryContext::new()).await;
        assert!(!result.success());
        assert_eq!(result.attempts(), Some(3));
        assert_eq!(machine.current_state(&id), Some(ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_unknown_client() {
        let machine = Arc::new(ConnectionStateMachine::new());
        let strategy = ReconnectStrategy::new(machine, |_| async { Ok(true) });
        let result = strategy
            .attempt_recovery(&lost(ClientId::new([9; 16])), &RecoveryContext::new())
            .await;
        assert!(!result.success());
        assert_eq!(result.attempts(), Some(0));
    }

    #[test]
    fn test_applicability() {
        let machine = Arc::new(ConnectionStateMachine::new());
        let strategy = ReconnectStrategy::new(machine, |_| async { Ok(true) });
        let id = ClientId::new([1; 16]);
        assert!(strategy.can_recover(&lost(id)));

        let timeout: NetworkError = ConnectionError::Timeout { client_id: id, after: Duration::from_secs(5) }.into();
        assert!(strategy.can_recover(&timeout));

        let refused: NetworkError = ConnectionError::Refused { client_id: id, reason: "full".into() }.into();
        assert!(!strategy.can_recover(&refused));
    }
}
