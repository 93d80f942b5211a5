//! Circuit breakers keyed by failure kind
//!
//! One breaker exists per `category:code` key, created lazily on the first
//! recorded failure. A breaker opens after `failure_threshold` failures and
//! moves to half-open on its own once `open_timeout` has elapsed; a success in
//! half-open closes it again.
//!
//! ```text
//! Closed ──N failures──▶ Open ──timeout──▶ HalfOpen ──success──▶ Closed
//!                         ▲                   │
//!                         └─────failure───────┘
//! ```

use crate::metrics::{names, MetricsSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - failure kind considered unhealthy
    Open,
    /// Circuit is half-open - waiting for a success to close
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    /// Numeric encoding used for the state gauge
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before going half-open
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failures counted toward the threshold
    pub failure_count: u32,
    /// Failures recorded over the breaker's lifetime
    pub total_failures: u64,
    /// Successes recorded over the breaker's lifetime
    pub total_successes: u64,
    /// Times the circuit has opened
    pub open_count: u64,
    /// Last failure time
    pub last_failure: Option<DateTime<Utc>>,
    /// Last state change
    pub last_state_change: DateTime<Utc>,
}

/// State-change observation
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerEvent {
    /// Breaker key (`category:code`)
    pub key: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Previous state
    pub previous_state: CircuitState,
    /// New state
    pub new_state: CircuitState,
    /// Additional context
    pub context: String,
}

/// Circuit breaker listener trait
#[async_trait::async_trait]
pub trait CircuitBreakerListener: Send + Sync {
    /// Called after every state transition, in transition order. Must not
    /// record outcomes on the breaker it is observing.
    async fn on_event(&self, event: &CircuitBreakerEvent);
}

type Listeners = Arc<RwLock<Vec<Arc<dyn CircuitBreakerListener>>>>;

/// A single breaker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

struct BreakerInner {
    key: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    emit_order: Mutex<()>,
    listeners: Listeners,
    cancel: CancellationToken,
}

/// Internal circuit breaker state
struct BreakerState {
    current: CircuitState,
    failure_count: u32,
    total_failures: u64,
    total_successes: u64,
    open_count: u64,
    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    /// Bumped on every open; a timer only fires for the generation it was armed for
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl CircuitBreaker {
    fn new(key: String, config: CircuitBreakerConfig, listeners: Listeners, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(BreakerInner {
                key,
                config,
                state: Mutex::new(BreakerState {
                    current: CircuitState::Closed,
                    failure_count: 0,
                    total_failures: 0,
                    total_successes: 0,
                    open_count: 0,
                    last_failure: None,
                    last_state_change: Utc::now(),
                    generation: 0,
                    timer: None,
                }),
                emit_order: Mutex::new(()),
                listeners,
                cancel,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.state.lock().await.current
    }

    /// Record failed operation, returning the resulting state
    pub async fn record_failure(&self) -> CircuitState {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        state.total_failures += 1;
        state.last_failure = Some(Utc::now());

        let event = match state.current {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= inner.config.failure_threshold {
                    error!(
                        key = %inner.key,
                        failures = state.failure_count,
                        "Circuit breaker opened"
                    );
                    Some(inner.open(&mut state, "failure threshold reached"))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                // Single failure in half-open state reopens the circuit
                state.failure_count += 1;
                warn!(key = %inner.key, "Circuit breaker reopened from half-open");
                Some(inner.open(&mut state, "failure while half-open"))
            }
            CircuitState::Open => {
                debug!(key = %inner.key, "Failure recorded while circuit is open");
                None
            }
        };

        let current = state.current;
        if let Some(event) = event {
            inner.emit(state, event).await;
        }
        current
    }

    /// Record successful operation, returning the resulting state
    pub async fn record_success(&self) -> CircuitState {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        state.total_successes += 1;

        let event = match state.current {
            CircuitState::Closed => {
                state.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                state.failure_count = 0;
                info!(key = %inner.key, "Circuit breaker closed after successful recovery");
                Some(inner.transition(&mut state, CircuitState::Closed, "success while half-open"))
            }
            CircuitState::Open => {
                warn!(key = %inner.key, "Success recorded while circuit is open");
                None
            }
        };

        let current = state.current;
        if let Some(event) = event {
            inner.emit(state, event).await;
        }
        current
    }

    /// Get current statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.inner.state.lock().await;
        CircuitBreakerStats {
            state: state.current,
            failure_count: state.failure_count,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            open_count: state.open_count,
            last_failure: state.last_failure,
            last_state_change: state.last_state_change,
        }
    }
}

impl BreakerInner {
    /// Move to open and arm the half-open timer. Caller holds the state lock.
    fn open(self: &Arc<Self>, state: &mut BreakerState, reason: &str) -> CircuitBreakerEvent {
        let event = self.transition(state, CircuitState::Open, reason);
        state.open_count += 1;
        state.generation += 1;

        if let Some(previous) = state.timer.take() {
            previous.abort();
        }

        let generation = state.generation;
        let deadline = tokio::time::Instant::now() + self.config.open_timeout;
        let inner = Arc::clone(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    debug!(key = %inner.key, "Half-open timer cancelled");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    inner.half_open(generation).await;
                }
            }
        }));

        event
    }

    async fn half_open(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.current != CircuitState::Open || state.generation != generation {
            debug!(key = %self.key, "Stale half-open timer ignored");
            return;
        }
        state.timer = None;
        info!(key = %self.key, "Circuit breaker transitioning to half-open");
        let event = self.transition(&mut state, CircuitState::HalfOpen, "open timeout elapsed");
        self.emit(state, event).await;
    }

    fn transition(
        &self,
        state: &mut BreakerState,
        new_state: CircuitState,
        reason: &str,
    ) -> CircuitBreakerEvent {
        let previous_state = state.current;
        state.current = new_state;
        state.last_state_change = Utc::now();

        CircuitBreakerEvent {
            key: self.key.clone(),
            timestamp: state.last_state_change,
            previous_state,
            new_state,
            context: format!("{previous_state} -> {new_state}: {reason}"),
        }
    }

    /// Deliver `event` to listeners. The emit slot is taken before the state
    /// lock is released, so listeners see transitions in the order they happened.
    async fn emit(&self, state: MutexGuard<'_, BreakerState>, event: CircuitBreakerEvent) {
        let _order = self.emit_order.lock().await;
        drop(state);
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_event(&event).await;
        }
    }
}

/// Emits transition counters and a state gauge
pub struct MetricsListener {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsListener {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

#[async_trait::async_trait]
impl CircuitBreakerListener for MetricsListener {
    async fn on_event(&self, event: &CircuitBreakerEvent) {
        self.sink.increment(
            names::CIRCUIT_BREAKER_TRANSITIONS,
            &[
                ("key", event.key.as_str()),
                ("from", event.previous_state.as_str()),
                ("to", event.new_state.as_str()),
            ],
            1,
        );
        self.sink.gauge(
            names::CIRCUIT_BREAKER_STATE,
            event.new_state.as_gauge(),
            &[("key", event.key.as_str())],
        );
    }
}

/// Lazily-populated set of breakers, one per failure kind
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    config: CircuitBreakerConfig,
    listeners: Listeners,
    cancel: CancellationToken,
}

impl CircuitBreakerRegistry {
    /// Create new circuit breaker registry
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_listeners(config, Vec::new())
    }

    /// Registry that reports transitions to `sink`
    pub fn with_metrics(config: CircuitBreakerConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let listener: Arc<dyn CircuitBreakerListener> = Arc::new(MetricsListener::new(sink));
        Self::with_listeners(config, vec![listener])
    }

    fn with_listeners(
        config: CircuitBreakerConfig,
        listeners: Vec<Arc<dyn CircuitBreakerListener>>,
    ) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            listeners: Arc::new(RwLock::new(listeners)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Add event listener
    pub async fn add_listener(&self, listener: Arc<dyn CircuitBreakerListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Get or create the breaker for `key`
    pub async fn get_breaker(&self, key: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().await.get(key) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                info!(key = key, "Created circuit breaker");
                CircuitBreaker::new(
                    key.to_string(),
                    self.config.clone(),
                    self.listeners.clone(),
                    self.cancel.child_token(),
                )
            })
            .clone()
    }

    pub async fn record_failure(&self, key: &str) -> CircuitState {
        self.get_breaker(key).await.record_failure().await
    }

    /// Successes never create a breaker; unknown keys stay closed
    pub async fn record_success(&self, key: &str) -> CircuitState {
        let breaker = self.breakers.read().await.get(key).cloned();
        match breaker {
            Some(breaker) => breaker.record_success().await,
            None => CircuitState::Closed,
        }
    }

    pub async fn get_state(&self, key: &str) -> CircuitState {
        let breaker = self.breakers.read().await.get(key).cloned();
        match breaker {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    pub async fn is_open(&self, key: &str) -> bool {
        self.get_state(key).await == CircuitState::Open
    }

    pub async fn stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        let breaker = self.breakers.read().await.get(key).cloned()?;
        Some(breaker.stats().await)
    }

    /// Get all circuit breaker statistics
    pub async fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers: Vec<_> = self.breakers.read().await.values().cloned().collect();
        let mut stats = HashMap::new();
        for breaker in breakers {
            stats.insert(breaker.key().to_string(), breaker.stats().await);
        }
        stats
    }

    /// Cancel every pending half-open timer
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CircuitBreakerRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsSink;
    use tokio::time::sleep;

    const KEY: &str = "external_service:PAYMENT_GATEWAY_DOWN";

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_exactly_at_threshold() {
        let registry = registry();

        for _ in 0..4 {
            assert_eq!(registry.record_failure(KEY).await, CircuitState::Closed);
        }
        assert!(!registry.is_open(KEY).await);

        assert_eq!(registry.record_failure(KEY).await, CircuitState::Open);
        assert!(registry.is_open(KEY).await);
        assert_eq!(registry.stats(KEY).await.unwrap().open_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_only_after_timeout() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_failure(KEY).await;
        }

        sleep(Duration::from_secs(30)).await;
        // More failures while open neither change state nor re-arm the timer
        for _ in 0..10 {
            assert_eq!(registry.record_failure(KEY).await, CircuitState::Open);
        }

        sleep(Duration::from_secs(29)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::Open);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_half_open_closes_and_resets() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_failure(KEY).await;
        }
        sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::HalfOpen);

        assert_eq!(registry.record_success(KEY).await, CircuitState::Closed);
        assert_eq!(registry.stats(KEY).await.unwrap().failure_count, 0);

        for _ in 0..4 {
            assert_eq!(registry.record_failure(KEY).await, CircuitState::Closed);
        }
        assert_eq!(registry.record_failure(KEY).await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_half_open_reopens_with_fresh_timer() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_failure(KEY).await;
        }
        sleep(Duration::from_secs(61)).await;

        assert_eq!(registry.record_failure(KEY).await, CircuitState::Open);

        sleep(Duration::from_secs(59)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::Open);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::HalfOpen);
        assert_eq!(registry.stats(KEY).await.unwrap().open_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_open_once() {
        let registry = Arc::new(registry());

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.record_failure(KEY).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stats = registry.stats(KEY).await.unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.open_count, 1);
        assert_eq!(stats.total_failures, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_failure(KEY).await;
        }

        registry.shutdown();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.get_state(KEY).await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unknown_key_is_closed_and_not_created() {
        let registry = registry();
        assert_eq!(registry.record_success("system:NOPE").await, CircuitState::Closed);
        assert_eq!(registry.get_state("system:NOPE").await, CircuitState::Closed);
        assert!(registry.stats("system:NOPE").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_reach_metrics() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let registry = CircuitBreakerRegistry::with_metrics(
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(10),
            },
            sink.clone(),
        );

        registry.record_failure(KEY).await;
        registry.record_failure(KEY).await;
        assert_eq!(
            sink.counter(
                names::CIRCUIT_BREAKER_TRANSITIONS,
                &[("key", KEY), ("from", "closed"), ("to", "open")]
            ),
            1
        );
        assert_eq!(
            sink.gauge_value(names::CIRCUIT_BREAKER_STATE, &[("key", KEY)]),
            Some(2.0)
        );

        sleep(Duration::from_secs(11)).await;
        assert_eq!(
            sink.gauge_value(names::CIRCUIT_BREAKER_STATE, &[("key", KEY)]),
            Some(1.0)
        );
    }

    struct SlowHalfOpenListener {
        seen: std::sync::Mutex<Vec<CircuitState>>,
    }

    #[async_trait::async_trait]
    impl CircuitBreakerListener for SlowHalfOpenListener {
        async fn on_event(&self, event: &CircuitBreakerEvent) {
            if event.new_state == CircuitState::HalfOpen {
                sleep(Duration::from_secs(5)).await;
            }
            self.seen.lock().unwrap().push(event.new_state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_see_transitions_in_order() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let registry = CircuitBreakerRegistry::with_metrics(
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_timeout: Duration::from_secs(10),
            },
            sink.clone(),
        );
        let listener = Arc::new(SlowHalfOpenListener {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        registry.add_listener(listener.clone()).await;

        registry.record_failure(KEY).await;
        // Half-open fires at 10s and its delivery runs until 15s
        sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.record_success(KEY).await, CircuitState::Closed);

        assert_eq!(
            *listener.seen.lock().unwrap(),
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
        assert_eq!(
            sink.gauge_value(names::CIRCUIT_BREAKER_STATE, &[("key", KEY)]),
            Some(0.0)
        );
    }
}
