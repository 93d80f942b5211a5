//! Error recovery patterns
//!
//! Circuit breakers keyed by `category:code`, retry policies, and the
//! orchestrator that maps a declared recovery strategy onto them.

pub mod circuit_breaker;
pub mod orchestrator;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerEvent, CircuitBreakerListener,
    CircuitBreakerRegistry, CircuitBreakerStats, CircuitState, MetricsListener,
};
pub use orchestrator::{
    hook_fn, FnHook, RecoveryHook, RecoveryHooks, RecoveryOrchestrator, RecoveryOutcome,
};
pub use retry_policy::{
    BackoffStrategy, JitterConfig, JitterType, RetryExecutor, RetryHook, RetryOn, RetryPolicy,
    RetryStats,
};
