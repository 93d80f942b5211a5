//! Configuration management for faultline
//!
//! Settings come from an optional TOML file overlaid with `FAULTLINE__…`
//! environment variables, e.g. `FAULTLINE__CIRCUIT_BREAKER__OPEN_TIMEOUT=90s`.
//! Every field has a default, so an empty source yields a working setup that
//! only alerts to the console.

use crate::alerting::channels::{EmailConfig, PagerDutyConfig, SlackConfig};
use crate::alerting::{DEFAULT_HISTORY_CAPACITY, DEFAULT_RATE_LIMIT_WINDOW};
use crate::error::{FaultlineError, Result};
use crate::error_recovery::CircuitBreakerConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FAULTLINE";

/// Default occurrence count above which a warning alert fires
pub const DEFAULT_ALERT_THRESHOLD: u64 = 10;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    /// Circuit breaker settings shared by every breaker
    pub circuit_breaker: CircuitBreakerConfig,

    /// Alert dispatch and channel settings
    pub alerting: AlertingConfig,

    /// Error handler policy
    pub handler: HandlerConfig,
}

/// Alert dispatch configuration
///
/// A channel is enabled by the presence of its section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Suppression window per `title:severity`
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,

    /// Number of recent alerts kept in memory
    pub history_capacity: usize,

    /// Log alerts locally, and use the log when no other channel is enabled
    pub console_enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagerduty: Option<PagerDutyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            console_enabled: true,
            slack: None,
            pagerduty: None,
            email: None,
        }
    }
}

/// Error handler policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Occurrences of one `category:code` above which a warning alert fires
    pub alert_threshold: u64,

    /// Capture a stack trace when normalizing foreign errors
    pub capture_stack: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            capture_stack: true,
        }
    }
}

impl FaultlineConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::finish(builder)
    }

    /// Load configuration from TOML text plus the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FaultlineError::config(format!("Failed to render configuration: {e}")))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(FaultlineError::config(
                "circuit_breaker.failure_threshold must be greater than zero",
            ));
        }
        if self.circuit_breaker.open_timeout.is_zero() {
            return Err(FaultlineError::config(
                "circuit_breaker.open_timeout must be greater than zero",
            ));
        }
        if self.handler.alert_threshold == 0 {
            return Err(FaultlineError::config(
                "handler.alert_threshold must be greater than zero",
            ));
        }

        let alerting = &self.alerting;
        if alerting.rate_limit_window.is_zero() {
            return Err(FaultlineError::config(
                "alerting.rate_limit_window must be greater than zero",
            ));
        }
        if alerting.history_capacity == 0 {
            return Err(FaultlineError::config(
                "alerting.history_capacity must be greater than zero",
            ));
        }

        if let Some(slack) = &alerting.slack {
            validate_http_url("alerting.slack.webhook_url", &slack.webhook_url)?;
        }
        if let Some(pagerduty) = &alerting.pagerduty {
            if pagerduty.integration_key.trim().is_empty() {
                return Err(FaultlineError::config(
                    "alerting.pagerduty.integration_key cannot be empty",
                ));
            }
            validate_http_url("alerting.pagerduty.events_url", &pagerduty.events_url)?;
        }
        if let Some(email) = &alerting.email {
            if email.smtp_host.trim().is_empty() {
                return Err(FaultlineError::config("alerting.email.smtp_host cannot be empty"));
            }
            if email.to.is_empty() {
                return Err(FaultlineError::config(
                    "alerting.email.to needs at least one recipient",
                ));
            }
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| FaultlineError::config(format!("Invalid {field} '{value}': {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(FaultlineError::config(format!(
            "{field} must use http or https scheme"
        )));
    }
    Ok(())
}
