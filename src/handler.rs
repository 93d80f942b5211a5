//! Error handler facade
//!
//! [`ErrorHandler`] is the single entry point for the host application. It
//! owns every registry, so one instance is built at startup and shared by
//! `Arc`:
//!
//! ```no_run
//! use faultline::{CanonicalError, ErrorHandler, FaultlineConfig};
//!
//! # async fn run() -> faultline::Result<()> {
//! let handler = ErrorHandler::new(FaultlineConfig::load(None)?)?;
//!
//! let report = handler
//!     .handle(CanonicalError::database("QUERY_TIMEOUT", "orders query timed out").build())
//!     .await;
//! println!("{} seen {} times", report.error.key(), report.occurrences);
//! # Ok(())
//! # }
//! ```

use crate::alerting::{Alert, AlertChannel, AlertDispatcher, AlertSeverity, DispatchOutcome};
use crate::canonical::{CanonicalError, Category, ErrorNormalizer, Failure, Severity};
use crate::config::FaultlineConfig;
use crate::context::{ContextProvider, TaskLocalContextProvider};
use crate::error::Result;
use crate::error_recovery::{
    CircuitBreakerRegistry, CircuitState, RecoveryHook, RecoveryHooks, RecoveryOrchestrator,
    RecoveryOutcome,
};
use crate::failure_registry::FailureRegistry;
use crate::metrics::{names, MetricsSink, TracingMetricsSink};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What [`ErrorHandler::handle`] did with a failure
#[derive(Debug, Clone, Serialize)]
pub struct HandleReport {
    /// Canonical form of the failure
    pub error: CanonicalError,
    /// Lifetime occurrences of the error's `category:code`, this one included
    pub occurrences: u64,
    /// Set when the alert policy fired
    #[serde(skip)]
    pub alert: Option<DispatchOutcome>,
    /// Set when the error was recoverable
    pub recovery: Option<RecoveryOutcome>,
}

impl HandleReport {
    /// True when an alert reached the dispatcher and was not rate limited
    pub fn alerted(&self) -> bool {
        self.alert.as_ref().is_some_and(|a| !a.is_suppressed())
    }
}

pub struct ErrorHandler {
    normalizer: ErrorNormalizer,
    failures: FailureRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    orchestrator: RecoveryOrchestrator,
    metrics: Arc<dyn MetricsSink>,
    alert_threshold: u64,
}

impl ErrorHandler {
    /// Handler with the channels enabled in `config`
    pub fn new(config: FaultlineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ErrorHandlerBuilder {
        ErrorHandlerBuilder::default()
    }

    /// Normalize, count, log, alert and recover
    ///
    /// Never fails; the report carries the canonical record so the caller can
    /// map severity and category onto its own response.
    pub async fn handle(&self, failure: impl Into<Failure>) -> HandleReport {
        let error = self.normalizer.normalize(failure);
        let occurrences = self
            .failures
            .record_occurrence(error.category(), error.code())
            .await;

        self.metrics.increment(
            names::ERRORS_TOTAL,
            &[
                ("category", error.category().as_str()),
                ("code", error.code()),
                ("severity", error.severity().as_str()),
            ],
            1,
        );
        self.metrics.histogram(
            names::ERROR_CONTEXT_SIZE,
            error.context().len() as f64,
            &[("category", error.category().as_str())],
        );
        log_error(&error, occurrences);

        let alert = match self.alert_for(&error, occurrences) {
            Some(alert) => Some(self.dispatcher.send(alert).await),
            None => None,
        };

        let recovery = if error.is_recoverable() {
            Some(self.orchestrator.attempt(&error).await)
        } else {
            None
        };

        HandleReport {
            error,
            occurrences,
            alert,
            recovery,
        }
    }

    /// Report a successful call so a half-open circuit can close
    pub async fn record_success(&self, category: Category, code: &str) -> CircuitState {
        self.breakers.record_success(&category.key_for(code)).await
    }

    /// Critical errors always alert; anything else alerts once its count
    /// passes the threshold
    fn alert_for(&self, error: &CanonicalError, occurrences: u64) -> Option<Alert> {
        let key = error.key();

        let alert = if error.severity() == Severity::Critical {
            Alert::new(
                AlertSeverity::Critical,
                format!("Critical error: {key}"),
                error.message(),
            )
            .with_tag("critical")
        } else if occurrences > self.alert_threshold {
            Alert::new(
                AlertSeverity::Warning,
                format!("High error rate: {key}"),
                format!(
                    "{key} has occurred {occurrences} times (threshold {})",
                    self.alert_threshold
                ),
            )
            .with_tag("error-rate")
        } else {
            return None;
        };

        let mut alert = alert
            .with_context("error_id", error.id().to_string())
            .with_context("category", error.category().as_str())
            .with_context("code", error.code())
            .with_context("occurrences", occurrences);
        if let Some(correlation_id) = error.correlation_id() {
            alert = alert.with_context("correlation_id", correlation_id);
        }
        Some(alert)
    }

    pub fn failures(&self) -> &FailureRegistry {
        &self.failures
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    pub fn alert_threshold(&self) -> u64 {
        self.alert_threshold
    }

    /// Cancel outstanding circuit breaker timers
    pub fn shutdown(&self) {
        info!("Shutting down error handler");
        self.breakers.shutdown();
    }
}

fn log_error(error: &CanonicalError, occurrences: u64) {
    match error.severity() {
        Severity::Critical | Severity::High => error!(
            error_id = %error.id(),
            key = %error.key(),
            severity = %error.severity(),
            occurrences,
            correlation_id = error.correlation_id().unwrap_or_default(),
            cause = error.cause().unwrap_or_default(),
            "{}",
            error.message()
        ),
        Severity::Medium => warn!(
            error_id = %error.id(),
            key = %error.key(),
            severity = %error.severity(),
            occurrences,
            correlation_id = error.correlation_id().unwrap_or_default(),
            "{}",
            error.message()
        ),
        Severity::Low => info!(
            error_id = %error.id(),
            key = %error.key(),
            severity = %error.severity(),
            occurrences,
            "{}",
            error.message()
        ),
    }
}

/// Builder for [`ErrorHandler`]
#[derive(Default)]
pub struct ErrorHandlerBuilder {
    config: FaultlineConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    context_provider: Option<Arc<dyn ContextProvider>>,
    channels: Vec<Arc<dyn AlertChannel>>,
    hooks: RecoveryHooks,
}

impl ErrorHandlerBuilder {
    pub fn config(mut self, config: FaultlineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    /// Add a channel, replacing the configured one of the same kind
    pub fn channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn retry_hook(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.hooks.retry = Some(hook);
        self
    }

    pub fn fallback_hook(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.hooks.fallback = Some(hook);
        self
    }

    pub fn compensation_hook(mut self, hook: Arc<dyn RecoveryHook>) -> Self {
        self.hooks.compensate = Some(hook);
        self
    }

    pub fn build(self) -> Result<ErrorHandler> {
        self.config.validate()?;

        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(TracingMetricsSink));
        let provider = self
            .context_provider
            .unwrap_or_else(|| Arc::new(TaskLocalContextProvider));

        let dispatcher = self.channels.into_iter().fold(
            AlertDispatcher::from_config(&self.config.alerting, metrics.clone())?,
            |dispatcher, channel| dispatcher.with_channel(channel),
        );
        let dispatcher = Arc::new(dispatcher);
        let breakers = Arc::new(CircuitBreakerRegistry::with_metrics(
            self.config.circuit_breaker.clone(),
            metrics.clone(),
        ));
        let orchestrator =
            RecoveryOrchestrator::new(breakers.clone(), dispatcher.clone(), metrics.clone())
                .with_hooks(self.hooks);

        Ok(ErrorHandler {
            normalizer: ErrorNormalizer::new(provider)
                .with_stack_capture(self.config.handler.capture_stack),
            failures: FailureRegistry::new(),
            breakers,
            dispatcher,
            orchestrator,
            metrics,
            alert_threshold: self.config.handler.alert_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::dispatcher::tests::RecordingChannel;
    use crate::alerting::ChannelKind;
    use crate::canonical::{RecoveryStrategy, UNKNOWN_ERROR_CODE};
    use crate::context::AmbientContext;
    use crate::error::FaultlineError;
    use crate::error_recovery::hook_fn;
    use crate::metrics::InMemoryMetricsSink;

    fn handler_with(metrics: Arc<InMemoryMetricsSink>) -> ErrorHandler {
        ErrorHandler::builder().metrics(metrics).build().unwrap()
    }

    #[tokio::test]
    async fn test_foreign_error_is_normalized_and_counted() {
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let handler = handler_with(metrics.clone());

        let report = handler.handle(FaultlineError::recovery("boom")).await;

        assert_eq!(report.error.code(), UNKNOWN_ERROR_CODE);
        assert_eq!(report.error.category(), Category::System);
        assert_eq!(report.occurrences, 1);
        assert!(report.alert.is_none());
        assert!(report.recovery.is_none());
        assert_eq!(
            metrics.counter(
                names::ERRORS_TOTAL,
                &[
                    ("category", "system"),
                    ("code", UNKNOWN_ERROR_CODE),
                    ("severity", "medium")
                ]
            ),
            1
        );
        assert_eq!(
            metrics.histogram_samples(names::ERROR_CONTEXT_SIZE, &[("category", "system")]).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_critical_error_alerts_on_first_occurrence() {
        let slack = RecordingChannel::new(ChannelKind::Slack);
        let handler = ErrorHandler::builder()
            .channel(slack.clone())
            .build()
            .unwrap();

        let report = handler
            .handle(CanonicalError::configuration("MISSING_SECRET", "JWT secret unset").build())
            .await;

        assert!(report.alerted());
        let sent = slack.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, AlertSeverity::Critical);
        assert_eq!(sent[0].title, "Critical error: configuration:MISSING_SECRET");
    }

    #[tokio::test]
    async fn test_threshold_is_configurable() {
        let mut config = FaultlineConfig::default();
        config.handler.alert_threshold = 2;
        let handler = ErrorHandler::new(config).unwrap();

        for _ in 0..2 {
            let report = handler
                .handle(CanonicalError::validation("BAD_EMAIL", "invalid").build())
                .await;
            assert!(report.alert.is_none());
        }
        let report = handler
            .handle(CanonicalError::validation("BAD_EMAIL", "invalid").build())
            .await;
        assert!(report.alerted());

        let history = handler.dispatcher().history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].message.contains("3 times"));
    }

    #[tokio::test]
    async fn test_correlation_id_flows_into_alert() {
        let handler = ErrorHandler::builder().build().unwrap();

        AmbientContext::with_correlation_id("req-42")
            .scope(async {
                handler
                    .handle(CanonicalError::system("DISK_FULL", "no space left").severity(Severity::Critical).build())
                    .await;
            })
            .await;

        let history = handler.dispatcher().history().await;
        assert_eq!(history[0].context.as_ref().unwrap()["correlation_id"], "req-42");
    }

    #[tokio::test]
    async fn test_recovery_hook_invoked_for_recoverable_error() {
        let handler = ErrorHandler::builder()
            .fallback_hook(Arc::new(hook_fn(|_error| async { Ok::<(), FaultlineError>(()) })))
            .build()
            .unwrap();

        let report = handler
            .handle(
                CanonicalError::database("REPLICA_LAG", "replica behind")
                    .recoverable(RecoveryStrategy::Fallback)
                    .build(),
            )
            .await;

        assert_eq!(
            report.recovery,
            Some(RecoveryOutcome::Recovered {
                strategy: RecoveryStrategy::Fallback
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_success_closes_half_open_breaker() {
        let handler = ErrorHandler::builder().build().unwrap();
        let error = CanonicalError::external_service("PAYMENT_GATEWAY_DOWN", "503").build();

        for _ in 0..5 {
            handler.handle(error.clone()).await;
        }
        let key = "external_service:PAYMENT_GATEWAY_DOWN";
        assert!(handler.breakers().is_open(key).await);

        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        assert_eq!(handler.breakers().get_state(key).await, CircuitState::HalfOpen);

        let state = handler
            .record_success(Category::ExternalService, "PAYMENT_GATEWAY_DOWN")
            .await;
        assert_eq!(state, CircuitState::Closed);
        handler.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = FaultlineConfig::default();
        config.alerting.history_capacity = 0;
        assert!(ErrorHandler::new(config).is_err());
    }
}
