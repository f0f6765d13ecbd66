//! Resynchronization
//!
//! Recovers from desync by rebuilding and resending the client's full
//! view.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{error, info};

use crate::error::{NetworkError, RecoveryType};
use crate::view::SecureViewLayer;
use super::strategy::{run_attempts, RecoveryConfig, RecoveryContext, RecoveryResult, RecoveryStrategy};

/// Boxed recovery operation: `Ok(true)` means recovered.
pub type RecoveryOperation = Arc<dyn Fn(RecoveryContext) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// Box a closure into a [`RecoveryOperation`].
pub fn operation<F, Fut>(f: F) -> RecoveryOperation
where
    F: Fn(RecoveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Resync strategy for game-state and stale-view errors.
pub struct ResyncStrategy {
    resync: RecoveryOperation,
    max_attempts: u32,
    delay: Duration,
    priority: i32,
}

impl ResyncStrategy {
    /// Default priority.
    pub const DEFAULT_PRIORITY: i32 = 100;

    /// Create with default limits (2 attempts, 1s apart).
    pub fn new<F, Fut>(resync: F) -> Self
    where
        F: Fn(RecoveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let defaults = RecoveryConfig::default();
        Self {
            resync: operation(resync),
            max_attempts: defaults.resync_max_attempts,
            delay: defaults.resync_delay,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Resync against a view layer: invalidate the game's caches, then
    /// run `resend` to push the rebuilt view.
    pub fn for_view_layer<F, Fut>(views: Arc<SecureViewLayer>, resend: F) -> Self
    where
        F: Fn(RecoveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let resend = operation(resend);
        Self::new(move |ctx: RecoveryContext| {
            let views = views.clone();
            let resend = resend.clone();
            async move {
                let game_id = ctx
                    .game_id
                    .ok_or_else(|| anyhow::anyhow!("resync needs a game id"))?;
                views
                    .invalidate_all_caches(&game_id)
                    .ok_or_else(|| anyhow::anyhow!("game {} is not registered", game_id))?;
                resend(ctx).await
            }
        })
    }

    /// Apply limits from config.
    pub fn with_config(mut self, config: &RecoveryConfig) -> Self {
        self.max_attempts = config.resync_max_attempts;
        self.delay = config.resync_delay;
        self
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl RecoveryStrategy for ResyncStrategy {
    fn can_recover(&self, error: &NetworkError) -> bool {
        matches!(error, NetworkError::GameState(_) | NetworkError::Validation(_))
            && error.recommended_strategy() == RecoveryType::Resync
    }

    async fn attempt_recovery(&self, _error: &NetworkError, context: &RecoveryContext) -> RecoveryResult {
        let resync = self.resync.clone();
        run_attempts("resync", self.max_attempts, |a| self.retry_delay(a), &context.cancel, |_| {
            resync(context.clone())
        })
        .await
        .with_metadata("strategy", RecoveryType::Resync.as_str())
    }

    fn recovery_type(&self) -> RecoveryType {
        RecoveryType::Resync
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn retry_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn on_recovery_failed(&self, error: &NetworkError, result: &RecoveryResult) {
        error!(
            error = %error,
            attempts = ?result.attempts(),
            "resync exhausted, session state may be corrupt"
        );
    }

    fn on_recovery_succeeded(&self, error: &NetworkError, result: &RecoveryResult) {
        info!(kind = error.kind(), attempts = ?result.attempts(), "resync complete");
    }
}
