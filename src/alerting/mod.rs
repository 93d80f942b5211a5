//! Alert model and multi-channel dispatch
//!
//! Alerts are transient: [`AlertDispatcher::send`] rate-limits them by
//! `title:severity`, keeps the most recent ones in a bounded history and fans
//! them out to every enabled channel for their severity.

pub mod channels;
pub mod dispatcher;
pub mod rate_limiter;

pub use channels::{AlertChannel, ConsoleChannel, EmailChannel, PagerDutyChannel, SlackChannel};
pub use dispatcher::{AlertDispatcher, DispatchOutcome, DEFAULT_HISTORY_CAPACITY};
pub use rate_limiter::{AlertRateLimiter, RateLimitResult, DEFAULT_RATE_LIMIT_WINDOW};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Channels an alert of this severity goes to when it names none
    pub fn default_channels(&self) -> &'static [ChannelKind] {
        match self {
            AlertSeverity::Critical => &[ChannelKind::Slack, ChannelKind::PagerDuty, ChannelKind::Email],
            AlertSeverity::High => &[ChannelKind::Slack, ChannelKind::Email],
            AlertSeverity::Warning => &[ChannelKind::Slack],
            AlertSeverity::Info => &[ChannelKind::Console],
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity '{other}'")),
        }
    }
}

/// Alert delivery channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Console,
    Slack,
    PagerDuty,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::Slack => "slack",
            ChannelKind::PagerDuty => "pagerduty",
            ChannelKind::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification for humans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
    /// Explicit targets; the severity table applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Stamped by the dispatcher when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new<T: Into<String>, M: Into<String>>(severity: AlertSeverity, title: T, message: M) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            context: None,
            channels: None,
            tags: None,
            timestamp: None,
        }
    }

    pub fn with_context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelKind>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.get_or_insert_with(Vec::new).push(tag.into());
        self
    }

    /// Rate-limit key: `title:severity`
    pub fn rate_limit_key(&self) -> String {
        format!("{}:{}", self.title, self.severity)
    }
}
