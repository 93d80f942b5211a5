//! faultline: error classification and reaction for async Rust services
//!
//! Every failure handed to [`ErrorHandler::handle`] is normalized into a
//! [`CanonicalError`], counted per `category:code`, logged and measured, and
//! then run through two policies:
//!
//! - **alerting**: critical errors and error kinds past a count threshold are
//!   sent to Slack, PagerDuty, email or the console, rate limited per title
//! - **recovery**: the error's declared [`RecoveryStrategy`] is carried out,
//!   which may trip a per-kind circuit breaker or escalate to a human
//!
//! The handler never fails its caller. Everything it did is returned in a
//! [`HandleReport`].

pub mod alerting;
pub mod canonical;
pub mod config;
pub mod context;
pub mod error;
pub mod error_recovery;
pub mod failure_registry;
pub mod handler;
pub mod logging;
pub mod metrics;

// Re-export main types for convenience
pub use alerting::{Alert, AlertChannel, AlertDispatcher, AlertSeverity, ChannelKind, DispatchOutcome};
pub use canonical::{
    CanonicalError, CanonicalErrorBuilder, Category, ErrorNormalizer, Failure, RecoveryStrategy,
    Severity,
};
pub use config::FaultlineConfig;
pub use context::{AmbientContext, ContextProvider};
pub use error::{FaultlineError, Result};
pub use error_recovery::{CircuitBreakerRegistry, CircuitState, RecoveryHook, RecoveryOutcome};
pub use failure_registry::FailureRegistry;
pub use handler::{ErrorHandler, ErrorHandlerBuilder, HandleReport};
pub use metrics::{InMemoryMetricsSink, MetricsSink, TracingMetricsSink};
