//! Recovery Manager
//!
//! Picks the best strategy for an error and runs it on the tokio runtime.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{NetworkError, RecoveryType};
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
use super::strategy::{RecoveryContext, RecoveryResult, RecoveryStrategy};

/// Handle to a recovery running in the background.
pub struct RecoveryHandle {
    join: JoinHandle<RecoveryResult>,
    recovery_type: RecoveryType,
    context: RecoveryContext,
}

impl RecoveryHandle {
    /// Kind of recovery running.
    pub fn recovery_type(&self) -> RecoveryType {
        self.recovery_type
    }

    /// Interrupt any wait between attempts.
    pub fn cancel(&self) {
        self.context.cancel.cancel();
    }

    /// Wait for the outcome. A panicking strategy yields a failed result.
    pub async fn wait(self) -> RecoveryResult {
        let started = Instant::now();
        match self.join.await {
            Ok(result) => result,
            Err(e) => RecoveryResult::failed(
                format!("recovery task aborted: {}", e),
                started.elapsed(),
                Some(anyhow::anyhow!(e.to_string())),
            ),
        }
    }
}

/// Registry of recovery strategies.
pub struct RecoveryManager {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RecoveryManager {
    /// Create a manager with no strategies and no telemetry.
    pub fn new() -> Self {
        Self::with_telemetry(Arc::new(NoopTelemetry))
    }

    /// Create a manager reporting to `telemetry`.
    pub fn with_telemetry(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            telemetry,
        }
    }

    /// Add a strategy.
    pub fn register(&self, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(
            strategy = strategy.recovery_type().as_str(),
            priority = strategy.priority(),
            "recovery strategy registered"
        );
        self.strategies.write().push(strategy);
    }

    /// Number of registered strategies.
    pub fn strategy_count(&self) -> usize {
        self.strategies.read().len()
    }

    /// Highest-priority strategy that can handle `error`.
    /// Ties go to the earliest registered.
    pub fn select(&self, error: &NetworkError) -> Option<Arc<dyn RecoveryStrategy>> {
        let strategies = self.strategies.read();
        let mut best: Option<&Arc<dyn RecoveryStrategy>> = None;
        for strategy in strategies.iter().filter(|s| s.can_recover(error)) {
            match best {
                Some(current) if current.priority() >= strategy.priority() => {}
                _ => best = Some(strategy),
            }
        }
        best.cloned()
    }

    /// Start recovering from `error` on a spawned task.
    ///
    /// Returns the error back if no strategy applies. Must be called from
    /// within a tokio runtime.
    pub fn recover(&self, error: NetworkError, context: RecoveryContext) -> Result<RecoveryHandle, NetworkError> {
        let Some(strategy) = self.select(&error) else {
            warn!(kind = error.kind(), error = %error, "no recovery strategy applies");
            return Err(error);
        };

        let recovery_type = strategy.recovery_type();
        debug!(kind = error.kind(), strategy = recovery_type.as_str(), "recovery started");

        let telemetry = self.telemetry.clone();
        let task_context = context.clone();
        let join = tokio::spawn(async move {
            let result = strategy.attempt_recovery(&error, &task_context).await;
            if result.success() {
                strategy.on_recovery_succeeded(&error, &result);
            } else {
                strategy.on_recovery_failed(&error, &result);
            }
            if recovery_type == RecoveryType::Resync {
                if let Some(game_id) = task_context.game_id.or_else(|| error.game_id()) {
                    telemetry.record(TelemetryEvent::StateSync {
                        game_id,
                        success: result.success(),
                        duration: result.duration(),
                    });
                }
            }
            result
        });

        Ok(RecoveryHandle { join, recovery_type, context })
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}
