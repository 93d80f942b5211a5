//! Alert channel adapters
//!
//! Each adapter maps an [`Alert`](crate::alerting::Alert) onto its wire
//! format. A channel is enabled by the presence of its configuration; the
//! console channel is always available.

mod console;
mod email;
mod pagerduty;
mod slack;

pub use console::ConsoleChannel;
pub use email::{EmailChannel, EmailConfig};
pub use pagerduty::{PagerDutyChannel, PagerDutyConfig, PAGERDUTY_EVENTS_URL};
pub use slack::{SlackChannel, SlackConfig};

use crate::alerting::{Alert, ChannelKind};
use crate::error::Result;
use std::time::Duration;

/// Timeout applied by the HTTP-based channels
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery target for alerts
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, alert: &Alert) -> Result<()>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("faultline/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
