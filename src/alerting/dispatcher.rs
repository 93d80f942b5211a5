//! Rate-limited, multi-channel alert dispatcher

use super::channels::{
    AlertChannel, ConsoleChannel, EmailChannel, PagerDutyChannel, SlackChannel,
};
use super::rate_limiter::{AlertRateLimiter, RateLimitResult};
use super::{Alert, ChannelKind};
use crate::config::AlertingConfig;
use crate::error::{panic_message, Result};
use crate::metrics::{names, MetricsSink, TracingMetricsSink};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of alerts kept in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// What happened to an alert passed to [`AlertDispatcher::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Same title and severity went out inside the rate-limit window
    Suppressed { retry_after: Duration },

    /// Recorded in history and handed to channels
    Dispatched {
        delivered: Vec<ChannelKind>,
        failed: Vec<(ChannelKind, String)>,
    },
}

impl DispatchOutcome {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, DispatchOutcome::Suppressed { .. })
    }

    /// Channels that accepted the alert
    pub fn delivered(&self) -> &[ChannelKind] {
        match self {
            DispatchOutcome::Dispatched { delivered, .. } => delivered,
            DispatchOutcome::Suppressed { .. } => &[],
        }
    }
}

/// Sends alerts to every enabled channel for their severity
pub struct AlertDispatcher {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
    rate_limiter: AlertRateLimiter,
    history: Mutex<VecDeque<Alert>>,
    history_capacity: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TracingMetricsSink))
    }
}

impl AlertDispatcher {
    /// Dispatcher with only the console channel enabled
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        let mut channels: HashMap<ChannelKind, Arc<dyn AlertChannel>> = HashMap::new();
        channels.insert(ChannelKind::Console, Arc::new(ConsoleChannel));

        Self {
            channels,
            rate_limiter: AlertRateLimiter::default(),
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY)),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            metrics,
        }
    }

    /// Build the dispatcher and the channels enabled in `config`
    pub fn from_config(config: &AlertingConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let mut dispatcher = Self::new(metrics)
            .with_rate_limit_window(config.rate_limit_window)
            .with_history_capacity(config.history_capacity);

        if !config.console_enabled {
            dispatcher = dispatcher.without_channel(ChannelKind::Console);
        }
        if let Some(slack) = &config.slack {
            dispatcher = dispatcher.with_channel(Arc::new(SlackChannel::new(slack.clone())?));
        }
        if let Some(pagerduty) = &config.pagerduty {
            dispatcher =
                dispatcher.with_channel(Arc::new(PagerDutyChannel::new(pagerduty.clone())?));
        }
        if let Some(email) = &config.email {
            dispatcher = dispatcher.with_channel(Arc::new(EmailChannel::new(email.clone())?));
        }

        info!(
            channels = ?dispatcher.enabled_channels(),
            window_secs = config.rate_limit_window.as_secs(),
            "Alert dispatcher configured"
        );
        Ok(dispatcher)
    }

    /// Enable a channel, replacing any channel of the same kind
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn without_channel(mut self, kind: ChannelKind) -> Self {
        self.channels.remove(&kind);
        self
    }

    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limiter = AlertRateLimiter::new(window);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.channels.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Rate-limit, record and fan out `alert`
    ///
    /// Never fails; channel errors and panics are logged, counted and
    /// reported in the outcome.
    pub async fn send(&self, mut alert: Alert) -> DispatchOutcome {
        if alert.timestamp.is_none() {
            alert.timestamp = Some(Utc::now());
        }

        let key = alert.rate_limit_key();
        if let RateLimitResult::Limited { retry_after } =
            self.rate_limiter.check_and_record(&key).await
        {
            info!(
                key = %key,
                retry_after_secs = retry_after.as_secs(),
                "Alert suppressed by rate limit"
            );
            self.metrics.increment(
                names::ALERTS_SUPPRESSED,
                &[("severity", alert.severity.as_str())],
                1,
            );
            return DispatchOutcome::Suppressed { retry_after };
        }

        self.record_history(alert.clone()).await;

        let targets = self.resolve_channels(&alert);
        if targets.is_empty() {
            warn!(key = %key, "No alert channel enabled; alert kept in history only");
            return DispatchOutcome::Dispatched {
                delivered: Vec::new(),
                failed: Vec::new(),
            };
        }

        let alert = &alert;
        let results = join_all(targets.into_iter().map(|channel| async move {
            let kind = channel.kind();
            let result = AssertUnwindSafe(channel.send(alert)).catch_unwind().await;
            (kind, result)
        }))
        .await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (kind, result) in results {
            let reason = match result {
                Ok(Ok(())) => {
                    delivered.push(kind);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("channel panicked: {}", panic_message(payload.as_ref())),
            };
            warn!(channel = %kind, key = %key, error = %reason, "Alert channel failed");
            self.metrics.increment(
                names::ALERT_CHANNEL_FAILURES,
                &[("channel", kind.as_str())],
                1,
            );
            failed.push((kind, reason));
        }

        self.metrics.increment(
            names::ALERTS_SENT,
            &[("severity", alert.severity.as_str())],
            1,
        );
        debug!(key = %key, delivered = ?delivered, "Alert dispatched");

        DispatchOutcome::Dispatched { delivered, failed }
    }

    /// Most recent alerts, oldest first
    pub async fn history(&self) -> Vec<Alert> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    async fn record_history(&self, alert: Alert) {
        let mut history = self.history.lock().await;
        while history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Explicit channels when given, the severity table otherwise; only
    /// enabled channels survive, with the console as the last resort
    fn resolve_channels(&self, alert: &Alert) -> Vec<Arc<dyn AlertChannel>> {
        let requested: &[ChannelKind] = match alert.channels.as_deref() {
            Some(explicit) if !explicit.is_empty() => explicit,
            _ => alert.severity.default_channels(),
        };

        let mut seen = Vec::with_capacity(requested.len());
        let mut targets = Vec::with_capacity(requested.len());
        for kind in requested {
            if seen.contains(kind) {
                continue;
            }
            seen.push(*kind);
            if let Some(channel) = self.channels.get(kind) {
                targets.push(Arc::clone(channel));
            }
        }

        if targets.is_empty() {
            if let Some(console) = self.channels.get(&ChannelKind::Console) {
                debug!(requested = ?requested, "Falling back to console channel");
                targets.push(Arc::clone(console));
            }
        }
        targets
    }
}
