use super::AlertChannel;
use crate::alerting::{Alert, AlertSeverity, ChannelKind};
use crate::error::Result;
use tracing::{error, info, warn};

/// Writes alerts to the application log
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleChannel;

#[async_trait::async_trait]
impl AlertChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let context = alert
            .context
            .as_ref()
            .map(|c| serde_json::to_string(c))
            .transpose()?
            .unwrap_or_default();
        let tags = alert.tags.as_deref().unwrap_or_default().join(",");

        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => error!(
                target: "faultline::alert",
                severity = %alert.severity,
                tags = %tags,
                context = %context,
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                target: "faultline::alert",
                severity = %alert.severity,
                tags = %tags,
                context = %context,
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
            AlertSeverity::Info => info!(
                target: "faultline::alert",
                severity = %alert.severity,
                tags = %tags,
                context = %context,
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
        }
        Ok(())
    }
}
