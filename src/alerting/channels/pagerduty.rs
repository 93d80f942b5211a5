use super::{http_client, AlertChannel, DEFAULT_CHANNEL_TIMEOUT};
use crate::alerting::{Alert, AlertSeverity, ChannelKind};
use crate::error::{FaultlineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// PagerDuty Events API v2 endpoint
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn default_events_url() -> String {
    PAGERDUTY_EVENTS_URL.to_string()
}

fn default_source() -> String {
    "faultline".to_string()
}

/// PagerDuty integration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagerDutyConfig {
    pub integration_key: String,
    #[serde(default = "default_events_url")]
    pub events_url: String,
    /// Reported as the event source
    #[serde(default = "default_source")]
    pub source: String,
}

impl PagerDutyConfig {
    pub fn new<S: Into<String>>(integration_key: S) -> Self {
        Self {
            integration_key: integration_key.into(),
            events_url: default_events_url(),
            source: default_source(),
        }
    }
}

/// Triggers PagerDuty incidents
pub struct PagerDutyChannel {
    config: PagerDutyConfig,
    client: reqwest::Client,
}

impl PagerDutyChannel {
    pub fn new(config: PagerDutyConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: http_client(DEFAULT_CHANNEL_TIMEOUT)?,
        })
    }

    fn event_severity(severity: AlertSeverity) -> &'static str {
        match severity {
            AlertSeverity::Critical => "critical",
            AlertSeverity::High => "error",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }

    /// Trigger event for `alert`; repeated alerts share a dedup key
    pub fn payload(&self, alert: &Alert) -> Value {
        json!({
            "routing_key": self.config.integration_key,
            "event_action": "trigger",
            "dedup_key": alert.rate_limit_key(),
            "payload": {
                "summary": alert.title,
                "severity": Self::event_severity(alert.severity),
                "source": self.config.source,
                "timestamp": alert.timestamp.map(|t| t.to_rfc3339()),
                "custom_details": {
                    "message": alert.message,
                    "context": alert.context,
                    "tags": alert.tags,
                },
            },
        })
    }
}

#[async_trait::async_trait]
impl AlertChannel for PagerDutyChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PagerDuty
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.config.events_url)
            .json(&self.payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FaultlineError::channel(
                "pagerduty",
                format!("HTTP {status}: {body}"),
            ));
        }

        debug!(title = %alert.title, "PagerDuty event triggered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_trigger_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(json!({
                "routing_key": "key-123",
                "event_action": "trigger",
                "dedup_key": "Payment gateway down:critical",
                "payload": { "severity": "critical", "source": "faultline" }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let channel = PagerDutyChannel::new(PagerDutyConfig {
            events_url: format!("{}/v2/enqueue", server.uri()),
            ..PagerDutyConfig::new("key-123")
        })
        .unwrap();

        let alert = Alert::new(AlertSeverity::Critical, "Payment gateway down", "5 failures");
        channel.send(&alert).await.unwrap();
    }

    #[test]
    fn test_high_maps_to_error() {
        let channel = PagerDutyChannel::new(PagerDutyConfig::new("k")).unwrap();
        let payload = channel.payload(&Alert::new(AlertSeverity::High, "t", "m"));
        assert_eq!(payload["payload"]["severity"], "error");
    }
}
