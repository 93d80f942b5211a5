use super::{http_client, AlertChannel, DEFAULT_CHANNEL_TIMEOUT};
use crate::alerting::{Alert, AlertSeverity, ChannelKind};
use crate::error::{FaultlineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Slack incoming-webhook settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    /// Overrides the webhook's default channel
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Posts alerts to a Slack incoming webhook
pub struct SlackChannel {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: http_client(DEFAULT_CHANNEL_TIMEOUT)?,
        })
    }

    fn color(severity: AlertSeverity) -> &'static str {
        match severity {
            AlertSeverity::Critical => "#8b0000",
            AlertSeverity::High => "#ff0000",
            AlertSeverity::Warning => "#ffa500",
            AlertSeverity::Info => "#36a64f",
        }
    }

    /// Incoming-webhook payload for `alert`
    pub fn payload(&self, alert: &Alert) -> Value {
        let mut fields: Vec<Value> = alert
            .context
            .iter()
            .flatten()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({ "title": key, "value": rendered, "short": true })
            })
            .collect();
        fields.sort_by(|a, b| a["title"].as_str().cmp(&b["title"].as_str()));

        let mut payload = json!({
            "text": format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title),
            "attachments": [{
                "color": Self::color(alert.severity),
                "title": alert.title,
                "text": alert.message,
                "fields": fields,
                "footer": alert.tags.as_deref().unwrap_or_default().join(", "),
                "ts": alert.timestamp.map(|t| t.timestamp()),
            }],
        });

        if let Some(channel) = &self.config.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        payload
    }
}

#[async_trait::async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FaultlineError::channel(
                "slack",
                format!("HTTP {status}: {body}"),
            ));
        }

        debug!(title = %alert.title, "Alert posted to Slack");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(url: String) -> SlackChannel {
        SlackChannel::new(SlackConfig {
            webhook_url: url,
            channel: Some("#alerts".to_string()),
            username: None,
        })
        .unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let slack = channel("http://localhost/hook".to_string());
        let alert = Alert::new(AlertSeverity::Warning, "High error rate", "11 occurrences")
            .with_context("count", 11);

        let payload = slack.payload(&alert);
        assert_eq!(payload["channel"], "#alerts");
        assert_eq!(payload["text"], "[WARNING] High error rate");
        assert_eq!(payload["attachments"][0]["color"], "#ffa500");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "11");
        assert!(payload.get("username").is_none());
    }

    #[tokio::test]
    async fn test_send_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({ "text": "[CRITICAL] Database down" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let slack = channel(format!("{}/hook", server.uri()));
        let alert = Alert::new(AlertSeverity::Critical, "Database down", "primary unreachable");
        slack.send(&alert).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("invalid_payload"))
            .mount(&server)
            .await;

        let slack = channel(format!("{}/hook", server.uri()));
        let err = slack
            .send(&Alert::new(AlertSeverity::Info, "t", "m"))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultlineError::Channel { .. }));
        assert!(err.to_string().contains("invalid_payload"));
    }
}
