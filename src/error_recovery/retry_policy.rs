//! Retry policy with backoff and jitter
//!
//! The orchestrator has no built-in notion of *what* to retry; callers supply
//! the operation. [`RetryHook`] packages such an operation together with a
//! [`RetryPolicy`] so it can be registered as the orchestrator's retry hook.

use crate::canonical::CanonicalError;
use crate::error::{FaultlineError, Result};
use crate::error_recovery::orchestrator::RecoveryHook;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,
    /// Jitter configuration
    pub jitter: JitterConfig,
    /// Which failures are retried
    pub retry_on: RetryOn,
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff (delay increases linearly)
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential backoff
    Exponential { multiplier: f64 },
    /// Fibonacci backoff
    Fibonacci,
}

/// Jitter configuration for retry delays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    /// Enable jitter
    pub enabled: bool,
    /// Jitter type
    pub jitter_type: JitterType,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

/// Types of jitter strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JitterType {
    /// Full jitter - delay = random(0, calculated_delay)
    Full,
    /// Equal jitter - delay = calculated_delay/2 + random(0, calculated_delay/2)
    Equal,
}

/// Failures eligible for another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Every error is retried until attempts run out
    AnyError,
    /// Only errors reporting [`FaultlineError::is_retryable`]
    RetryableOnly,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter: JitterConfig {
                enabled: true,
                jitter_type: JitterType::Equal,
                jitter_factor: 0.5,
            },
            retry_on: RetryOn::AnyError,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic delays
    pub fn without_jitter(mut self) -> Self {
        self.jitter.enabled = false;
        self
    }

    /// Calculate delay before attempt `attempt + 1`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match &self.backoff_strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear { increment } => {
                self
                    .initial_delay
                    .saturating_add(increment.saturating_mul(attempt - 1))
            }
            BackoffStrategy::Exponential { multiplier } => {
                let ms = self.initial_delay.as_millis() as f64 * multiplier.powi((attempt - 1) as i32);
                Duration::from_millis(ms.min(u64::MAX as f64) as u64)
            }
            BackoffStrategy::Fibonacci => self.initial_delay.saturating_mul(fibonacci(attempt)),
        };

        let capped_delay = base_delay.min(self.max_delay);

        if self.jitter.enabled {
            self.apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let delay_ms = delay.as_millis() as f64;
        let factor = self.jitter.jitter_factor.clamp(0.0, 1.0);

        let jittered_ms = match self.jitter.jitter_type {
            JitterType::Full => rng.gen_range(0.0..=delay_ms * factor),
            JitterType::Equal => {
                let half = delay_ms / 2.0;
                half + rng.gen_range(0.0..=half * factor)
            }
        };

        Duration::from_millis(jittered_ms as u64)
    }

    /// Check if error should be retried
    pub fn should_retry(&self, error: &FaultlineError) -> bool {
        match self.retry_on {
            RetryOn::AnyError => true,
            RetryOn::RetryableOnly => error.is_retryable(),
        }
    }
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted)
    pub failed_after_retries: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: RwLock<RetryStats>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: RwLock::new(RetryStats::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 1 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if attempt >= max_attempts {
                self.stats.write().await.failed_after_retries += 1;
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(error);
            }

            if !self.policy.should_retry(&error) {
                debug!("Error not retryable: {}", error);
                return Err(error);
            }

            let delay = self.policy.calculate_delay(attempt);
            {
                let mut stats = self.stats.write().await;
                stats.total_retry_attempts += 1;
                stats.last_retry = Some(Utc::now());
            }

            debug!(
                "Retrying after {:?} (attempt {}/{})",
                delay, attempt, max_attempts
            );
            sleep(delay).await;
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }
}

/// Calculate fibonacci number
fn fibonacci(n: u32) -> u32 {
    match n {
        0 => 0,
        1 => 1,
        _ => {
            let mut a: u32 = 0;
            let mut b: u32 = 1;
            for _ in 2..=n {
                let temp = a.saturating_add(b);
                a = b;
                b = temp;
            }
            b
        }
    }
}

/// Retry hook: re-runs a caller-supplied operation under a [`RetryPolicy`]
pub struct RetryHook<F> {
    executor: RetryExecutor,
    operation: F,
}

impl<F, Fut> RetryHook<F>
where
    F: Fn(CanonicalError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(policy: RetryPolicy, operation: F) -> Self {
        Self {
            executor: RetryExecutor::new(policy),
            operation,
        }
    }

    pub async fn stats(&self) -> RetryStats {
        self.executor.get_stats().await
    }
}

#[async_trait::async_trait]
impl<F, Fut> RecoveryHook for RetryHook<F>
where
    F: Fn(CanonicalError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, error: &CanonicalError) -> Result<()> {
        self.executor
            .execute(|| (self.operation)(error.clone()))
            .await
    }
}
