use super::AlertChannel;
use crate::alerting::{Alert, ChannelKind};
use crate::error::{FaultlineError, Result};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

/// SMTP settings for the email channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    /// Upgrade the connection with STARTTLS; plain SMTP otherwise
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

/// Sends alerts as plain-text email
pub struct EmailChannel {
    from: Mailbox,
    to: Vec<Mailbox>,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    /// Parses addresses and prepares the transport; nothing connects until a send
    pub fn new(config: EmailConfig) -> Result<Self> {
        if config.to.is_empty() {
            return Err(FaultlineError::email("no recipients configured"));
        }

        let from: Mailbox = config.from.parse()?;
        let to = config
            .to
            .iter()
            .map(|addr| addr.parse::<Mailbox>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);

        if let Some(username) = config.username {
            builder = builder.credentials(Credentials::new(
                username,
                config.password.unwrap_or_default(),
            ));
        }

        Ok(Self {
            from,
            to,
            mailer: builder.build(),
        })
    }

    fn subject(alert: &Alert) -> String {
        format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title)
    }

    fn body(alert: &Alert) -> String {
        let mut body = format!("{}\n", alert.message);

        if let Some(context) = &alert.context {
            let mut keys: Vec<_> = context.keys().collect();
            keys.sort();
            body.push_str("\nContext:\n");
            for key in keys {
                let _ = writeln!(body, "  {key}: {}", context[key]);
            }
        }
        if let Some(tags) = alert.tags.as_ref().filter(|t| !t.is_empty()) {
            let _ = writeln!(body, "\nTags: {}", tags.join(", "));
        }
        if let Some(ts) = alert.timestamp {
            let _ = writeln!(body, "\nRaised at {}", ts.to_rfc3339());
        }
        body
    }

    pub fn render(&self, alert: &Alert) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(Self::subject(alert));
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        Ok(builder
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(alert))?)
    }
}

#[async_trait::async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let message = self.render(alert)?;
        self.mailer.send(message).await?;
        debug!(title = %alert.title, recipients = self.to.len(), "Alert emailed");
        Ok(())
    }
}
