//! Metrics sink abstraction
//!
//! faultline emits counters, histograms and gauges through [`MetricsSink`];
//! wiring them to a real backend is the host application's concern.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Metric names emitted by faultline
pub mod names {
    pub const ERRORS_TOTAL: &str = "errors.total";
    pub const ERROR_CONTEXT_SIZE: &str = "errors.context_size";
    pub const ALERTS_SENT: &str = "alerts.sent";
    pub const ALERTS_SUPPRESSED: &str = "alerts.suppressed";
    pub const ALERT_CHANNEL_FAILURES: &str = "alerts.channel_failures";
    pub const RECOVERY_SUCCESS: &str = "recovery.success";
    pub const RECOVERY_FAILURE: &str = "recovery.failure";
    pub const CIRCUIT_BREAKER_TRANSITIONS: &str = "circuit_breaker.transitions";
    pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker.state";
}

/// Tag list attached to a metric sample
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Destination for metric samples
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, tags: Tags<'_>, value: u64);
    fn histogram(&self, name: &str, value: f64, tags: Tags<'_>);
    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);
}

/// Emits every sample as a `tracing` debug event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn increment(&self, name: &str, tags: Tags<'_>, value: u64) {
        debug!(metric = name, kind = "counter", value, tags = ?tags, "metric");
    }

    fn histogram(&self, name: &str, value: f64, tags: Tags<'_>) {
        debug!(metric = name, kind = "histogram", value, tags = ?tags, "metric");
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        debug!(metric = name, kind = "gauge", value, tags = ?tags, "metric");
    }
}

/// Keeps samples in memory so they can be inspected
///
/// Series are identified by name plus sorted tags, e.g.
/// `errors.total{category=database,code=QUERY_TIMEOUT}`.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    inner: Mutex<MetricStore>,
}

#[derive(Debug, Default)]
struct MetricStore {
    counters: HashMap<String, u64>,
    histograms: HashMap<String, Vec<f64>>,
    gauges: HashMap<String, f64>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value for an exact series
    pub fn counter(&self, name: &str, tags: Tags<'_>) -> u64 {
        self.with_store(|s| s.counters.get(&series(name, tags)).copied().unwrap_or(0))
    }

    /// Sum of a counter across all tag combinations
    pub fn counter_total(&self, name: &str) -> u64 {
        self.with_store(|s| {
            s.counters
                .iter()
                .filter(|(key, _)| series_name(key) == name)
                .map(|(_, v)| *v)
                .sum()
        })
    }

    pub fn histogram_samples(&self, name: &str, tags: Tags<'_>) -> Vec<f64> {
        self.with_store(|s| s.histograms.get(&series(name, tags)).cloned().unwrap_or_default())
    }

    pub fn gauge_value(&self, name: &str, tags: Tags<'_>) -> Option<f64> {
        self.with_store(|s| s.gauges.get(&series(name, tags)).copied())
    }

    /// All counters, keyed by series
    pub fn counters(&self) -> HashMap<String, u64> {
        self.with_store(|s| s.counters.clone())
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut MetricStore) -> R) -> R {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn increment(&self, name: &str, tags: Tags<'_>, value: u64) {
        self.with_store(|s| *s.counters.entry(series(name, tags)).or_insert(0) += value);
    }

    fn histogram(&self, name: &str, value: f64, tags: Tags<'_>) {
        self.with_store(|s| s.histograms.entry(series(name, tags)).or_default().push(value));
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        self.with_store(|s| {
            s.gauges.insert(series(name, tags), value);
        });
    }
}

fn series(name: &str, tags: Tags<'_>) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = tags.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

fn series_name(series: &str) -> &str {
    series.split('{').next().unwrap_or(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_ignores_tag_order() {
        let sink = InMemoryMetricsSink::new();
        sink.increment("errors.total", &[("code", "X"), ("category", "system")], 1);
        sink.increment("errors.total", &[("category", "system"), ("code", "X")], 2);

        assert_eq!(
            sink.counter("errors.total", &[("category", "system"), ("code", "X")]),
            3
        );
        assert_eq!(sink.counter_total("errors.total"), 3);
    }

    #[test]
    fn test_histogram_and_gauge() {
        let sink = InMemoryMetricsSink::new();
        sink.histogram("errors.context_size", 3.0, &[]);
        sink.histogram("errors.context_size", 5.0, &[]);
        sink.gauge("circuit_breaker.state", 1.0, &[("key", "a:b")]);
        sink.gauge("circuit_breaker.state", 2.0, &[("key", "a:b")]);

        assert_eq!(sink.histogram_samples("errors.context_size", &[]), vec![3.0, 5.0]);
        assert_eq!(sink.gauge_value("circuit_breaker.state", &[("key", "a:b")]), Some(2.0));
        assert_eq!(sink.gauge_value("circuit_breaker.state", &[]), None);
    }
}
