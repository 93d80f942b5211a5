//! Per-key alert rate limiting
//!
//! Remembers when each `title:severity` key last went out and suppresses
//! repeats inside the window. Entries are only ever overwritten, never purged.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default suppression window
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Send allowed; the send time has been recorded
    Allowed,

    /// A send for the same key happened inside the window
    Limited { retry_after: Duration },
}

/// Last-send-time rate limiter
#[derive(Debug)]
pub struct AlertRateLimiter {
    window: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Default for AlertRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_WINDOW)
    }
}

impl AlertRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check `key` and, if allowed, record now as its last send
    pub async fn check_and_record(&self, key: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock().await;

        if let Some(previous) = last_sent.get(key) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < self.window {
                debug!(key = key, elapsed_ms = elapsed.as_millis() as u64, "Alert rate limited");
                return RateLimitResult::Limited {
                    retry_after: self.window - elapsed,
                };
            }
        }

        last_sent.insert(key.to_string(), now);
        RateLimitResult::Allowed
    }

    /// Number of keys ever sent
    pub async fn tracked_keys(&self) -> usize {
        self.last_sent.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_send_allowed_then_limited() {
        let limiter = AlertRateLimiter::default();

        assert_eq!(limiter.check_and_record("a:warning").await, RateLimitResult::Allowed);
        assert!(matches!(
            limiter.check_and_record("a:warning").await,
            RateLimitResult::Limited { .. }
        ));
        assert_eq!(limiter.check_and_record("b:warning").await, RateLimitResult::Allowed);
        assert_eq!(limiter.tracked_keys().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry() {
        let limiter = AlertRateLimiter::new(Duration::from_secs(300));
        limiter.check_and_record("k").await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(
            limiter.check_and_record("k").await,
            RateLimitResult::Limited {
                retry_after: Duration::from_secs(1)
            }
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.check_and_record("k").await, RateLimitResult::Allowed);
    }
}
