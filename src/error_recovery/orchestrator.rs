//! Strategy-driven recovery
//!
//! [`RecoveryOrchestrator::attempt`] maps a canonical error's declared
//! [`RecoveryStrategy`] onto an action. Retry, fallback and compensation are
//! extension points filled by [`RecoveryHook`]s; circuit breaking, escalation
//! and ignore are built in. Nothing here ever fails the caller: hook errors
//! and panics become a [`RecoveryOutcome::Failed`].

use crate::alerting::{Alert, AlertDispatcher, AlertSeverity, DispatchOutcome};
use crate::canonical::{CanonicalError, RecoveryStrategy};
use crate::error::{panic_message, FaultlineError, Result};
use crate::error_recovery::CircuitBreakerRegistry;
use crate::metrics::{names, MetricsSink};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Caller-supplied recovery action
#[async_trait::async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn run(&self, error: &CanonicalError) -> Result<()>;
}

/// Recovery hook backed by an async closure
pub struct FnHook<F>(F);

/// Wrap an async closure as a [`RecoveryHook`]
pub fn hook_fn<F, Fut>(f: F) -> FnHook<F>
where
    F: Fn(CanonicalError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHook(f)
}

#[async_trait::async_trait]
impl<F, Fut> RecoveryHook for FnHook<F>
where
    F: Fn(CanonicalError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, error: &CanonicalError) -> Result<()> {
        (self.0)(error.clone()).await
    }
}

/// Hooks for the strategies faultline cannot carry out by itself
#[derive(Clone, Default)]
pub struct RecoveryHooks {
    pub retry: Option<Arc<dyn RecoveryHook>>,
    pub fallback: Option<Arc<dyn RecoveryHook>>,
    pub compensate: Option<Arc<dyn RecoveryHook>>,
}

impl RecoveryHooks {
    fn for_strategy(&self, strategy: RecoveryStrategy) -> Option<&Arc<dyn RecoveryHook>> {
        match strategy {
            RecoveryStrategy::Retry => self.retry.as_ref(),
            RecoveryStrategy::Fallback => self.fallback.as_ref(),
            RecoveryStrategy::Compensate => self.compensate.as_ref(),
            _ => None,
        }
    }
}

/// Result of a recovery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Not recoverable or no strategy declared
    NotApplicable,
    /// Strategy carried out
    Recovered { strategy: RecoveryStrategy },
    /// Strategy needs a hook and none is registered
    Skipped { strategy: RecoveryStrategy },
    /// Hook returned an error or panicked
    Failed {
        strategy: RecoveryStrategy,
        reason: String,
    },
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered { .. })
    }
}

pub struct RecoveryOrchestrator {
    breakers: Arc<CircuitBreakerRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<dyn MetricsSink>,
    hooks: RecoveryHooks,
}

impl RecoveryOrchestrator {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            breakers,
            dispatcher,
            metrics,
            hooks: RecoveryHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: RecoveryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hooks(&self) -> &RecoveryHooks {
        &self.hooks
    }

    /// Carry out the error's declared strategy
    pub async fn attempt(&self, error: &CanonicalError) -> RecoveryOutcome {
        let strategy = match error.recovery() {
            Some(strategy) if error.is_recoverable() => strategy,
            _ => return RecoveryOutcome::NotApplicable,
        };

        let result = AssertUnwindSafe(self.execute(strategy, error))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(true)) => RecoveryOutcome::Recovered { strategy },
            Ok(Ok(false)) => RecoveryOutcome::Skipped { strategy },
            Ok(Err(e)) => RecoveryOutcome::Failed {
                strategy,
                reason: e.to_string(),
            },
            Err(payload) => RecoveryOutcome::Failed {
                strategy,
                reason: format!("recovery panicked: {}", panic_message(payload.as_ref())),
            },
        };

        let tags = [
            ("strategy", strategy.as_str()),
            ("category", error.category().as_str()),
        ];
        match &outcome {
            RecoveryOutcome::Recovered { .. } => {
                self.metrics.increment(names::RECOVERY_SUCCESS, &tags, 1);
            }
            RecoveryOutcome::Failed { reason, .. } => {
                error!(
                    error_id = %error.id(),
                    key = %error.key(),
                    strategy = %strategy,
                    reason = %reason,
                    "Recovery failed"
                );
                self.metrics.increment(names::RECOVERY_FAILURE, &tags, 1);
            }
            RecoveryOutcome::Skipped { .. } => {
                debug!(key = %error.key(), strategy = %strategy, "Recovery skipped");
            }
            RecoveryOutcome::NotApplicable => {}
        }
        outcome
    }

    /// `Ok(false)` when the strategy's hook is missing or the escalation
    /// alert was rate limited
    async fn execute(&self, strategy: RecoveryStrategy, error: &CanonicalError) -> Result<bool> {
        match strategy {
            RecoveryStrategy::Retry | RecoveryStrategy::Fallback | RecoveryStrategy::Compensate => {
                let Some(hook) = self.hooks.for_strategy(strategy) else {
                    return Ok(false);
                };
                hook.run(error).await?;
                debug!(key = %error.key(), strategy = %strategy, "Recovery hook succeeded");
                Ok(true)
            }
            RecoveryStrategy::CircuitBreak => {
                let key = error.key();
                let state = self.breakers.record_failure(&key).await;
                debug!(key = %key, state = %state, "Failure recorded on circuit breaker");
                Ok(true)
            }
            RecoveryStrategy::Escalate => {
                match self.dispatcher.send(escalation_alert(error)).await {
                    DispatchOutcome::Suppressed { retry_after } => {
                        info!(
                            key = %error.key(),
                            retry_after = ?retry_after,
                            "Escalation suppressed by alert rate limit"
                        );
                        Ok(false)
                    }
                    DispatchOutcome::Dispatched { delivered, failed }
                        if delivered.is_empty() && !failed.is_empty() =>
                    {
                        let reasons = failed
                            .iter()
                            .map(|(channel, reason)| format!("{channel}: {reason}"))
                            .collect::<Vec<_>>()
                            .join("; ");
                        Err(FaultlineError::recovery(format!(
                            "escalation not delivered ({reasons})"
                        )))
                    }
                    DispatchOutcome::Dispatched { delivered, .. } if delivered.is_empty() => {
                        Ok(false)
                    }
                    DispatchOutcome::Dispatched { .. } => Ok(true),
                }
            }
            RecoveryStrategy::Ignore => {
                info!(
                    target: "faultline::audit",
                    error_id = %error.id(),
                    key = %error.key(),
                    message = %error.message(),
                    "Error ignored by recovery policy"
                );
                Ok(true)
            }
        }
    }
}

fn escalation_alert(error: &CanonicalError) -> Alert {
    let mut alert = Alert::new(
        AlertSeverity::High,
        format!("Escalated error: {}", error.key()),
        error.message(),
    )
    .with_context("error_id", error.id().to_string())
    .with_context("category", error.category().as_str())
    .with_context("code", error.code())
    .with_context("severity", error.severity().as_str())
    .with_tag("escalation");

    if let Some(correlation_id) = error.correlation_id() {
        alert = alert.with_context("correlation_id", correlation_id);
    }
    if let Some(remediation) = error.remediation() {
        alert = alert.with_context("remediation", remediation);
    }
    alert
}
