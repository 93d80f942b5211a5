//! Common test utilities
#![allow(dead_code)]

use faultline::alerting::{Alert, AlertChannel, ChannelKind};
use faultline::{ErrorHandler, FaultlineConfig, InMemoryMetricsSink};
use std::sync::{Arc, Mutex};

/// Channel that keeps every alert it receives
pub struct CapturingChannel {
    kind: ChannelKind,
    alerts: Mutex<Vec<Alert>>,
}

impl CapturingChannel {
    pub fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            alerts: Mutex::new(Vec::new()),
        })
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AlertChannel for CapturingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, alert: &Alert) -> faultline::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Handler wired to an in-memory metrics sink and a capturing Slack channel
pub struct TestHarness {
    pub handler: ErrorHandler,
    pub metrics: Arc<InMemoryMetricsSink>,
    pub slack: Arc<CapturingChannel>,
}

pub fn harness() -> TestHarness {
    harness_with(FaultlineConfig::default())
}

pub fn harness_with(config: FaultlineConfig) -> TestHarness {
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let slack = CapturingChannel::new(ChannelKind::Slack);
    let handler = ErrorHandler::builder()
        .config(config)
        .metrics(metrics.clone())
        .channel(slack.clone())
        .build()
        .expect("valid test configuration");

    TestHarness {
        handler,
        metrics,
        slack,
    }
}
