//! End-to-end behaviour of the error handler

mod common;

use common::{harness, harness_with};
use faultline::alerting::{AlertSeverity, ChannelKind};
use faultline::canonical::UNKNOWN_ERROR_CODE;
use faultline::metrics::names;
use faultline::{
    AmbientContext, CanonicalError, Category, CircuitState, ErrorNormalizer, FaultlineConfig,
    RecoveryOutcome, RecoveryStrategy, Severity,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn query_timeout() -> CanonicalError {
    CanonicalError::database("QUERY_TIMEOUT", "orders query timed out")
        .severity(Severity::Medium)
        .build()
}

#[tokio::test]
async fn test_critical_error_always_alerts() {
    let h = harness();

    // Push the count well past the threshold first
    for _ in 0..20 {
        h.handler
            .handle(CanonicalError::system("DISK_FULL", "no space left").build())
            .await;
    }
    let report = h
        .handler
        .handle(
            CanonicalError::system("DISK_FULL", "no space left")
                .severity(Severity::Critical)
                .build(),
        )
        .await;

    assert!(report.alerted());
    let history = h.handler.dispatcher().history().await;
    assert!(history
        .iter()
        .any(|a| a.severity == AlertSeverity::Critical));
}

#[tokio::test]
async fn test_error_rate_alert_fires_once_past_threshold() {
    let h = harness();

    for _ in 0..11 {
        h.handler
            .handle(query_timeout())
            .await;
    }

    let warnings: Vec<_> = h
        .slack
        .alerts()
        .into_iter()
        .filter(|a| a.severity == AlertSeverity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].title, "High error rate: database:QUERY_TIMEOUT");
    assert!(warnings[0].message.contains("11"));
    assert_eq!(
        h.handler
            .failures()
            .count(Category::Database, "QUERY_TIMEOUT")
            .await,
        11
    );
}

#[tokio::test]
async fn test_error_rate_alert_is_rate_limited() {
    let h = harness();

    for _ in 0..15 {
        h.handler
            .handle(query_timeout())
            .await;
    }

    assert_eq!(h.slack.alerts().len(), 1);
    assert_eq!(h.metrics.counter_total(names::ALERTS_SUPPRESSED), 4);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_break_strategy_opens_breaker() {
    let h = harness();
    let key = "external_service:PAYMENT_GATEWAY_DOWN";

    for attempt in 1..=5 {
        let report = h
            .handler
            .handle(
                CanonicalError::external_service("PAYMENT_GATEWAY_DOWN", "gateway returned 503")
                    .build(),
            )
            .await;
        assert_eq!(
            report.recovery,
            Some(RecoveryOutcome::Recovered {
                strategy: RecoveryStrategy::CircuitBreak
            })
        );
        if attempt < 5 {
            assert_eq!(h.handler.breakers().get_state(key).await, CircuitState::Closed);
        }
    }

    assert!(h.handler.breakers().is_open(key).await);
    assert_eq!(
        h.metrics
            .counter(names::CIRCUIT_BREAKER_TRANSITIONS, &[("from", "closed"), ("key", key), ("to", "open")]),
        1
    );

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.handler.breakers().get_state(key).await, CircuitState::HalfOpen);
    h.handler.shutdown();
}

#[tokio::test]
async fn test_escalation_sends_high_alert() {
    let h = harness();

    h.handler
        .handle(
            CanonicalError::business_logic("LEDGER_MISMATCH", "ledger totals differ")
                .recoverable(RecoveryStrategy::Escalate)
                .build(),
        )
        .await;

    let alerts = h.slack.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    assert_eq!(alerts[0].title, "Escalated error: business_logic:LEDGER_MISMATCH");
}

#[tokio::test]
async fn test_foreign_failures_become_unknown_errors() {
    let h = harness();

    let report = h
        .handler
        .handle(anyhow::anyhow!("socket closed").context("sync failed"))
        .await;

    assert_eq!(report.error.code(), UNKNOWN_ERROR_CODE);
    assert_eq!(report.error.category(), Category::System);
    assert_eq!(report.error.severity(), Severity::Medium);
    assert!(!report.error.is_recoverable());
    assert_eq!(report.error.context()["message"], "sync failed");
    assert!(report.error.context().contains_key("source_chain"));

    let report = h.handler.handle("plain message").await;
    assert_eq!(report.error.message(), "plain message");
    assert_eq!(report.occurrences, 2);
}

#[test]
fn test_normalizing_canonical_error_keeps_identity() {
    let normalizer = ErrorNormalizer::default();
    let original = CanonicalError::authentication("TOKEN_EXPIRED", "session token expired")
        .context("user", "u-17")
        .build();

    let normalized = normalizer.normalize(original.clone());
    assert_eq!(normalized.id(), original.id());
    assert_eq!(normalized, original);
}

#[tokio::test]
async fn test_ambient_context_is_captured() {
    let h = harness();

    let report = AmbientContext::with_correlation_id("req-981")
        .user_id("u-4")
        .scope(h.handler.handle("checkout failed"))
        .await;

    assert_eq!(report.error.correlation_id(), Some("req-981"));
    assert_eq!(report.error.ambient().user_id.as_deref(), Some("u-4"));
}

#[tokio::test]
async fn test_alert_threshold_from_config() {
    let mut config = FaultlineConfig::default();
    config.handler.alert_threshold = 1;
    let h = harness_with(config);

    h.handler
        .handle(CanonicalError::validation("BAD_EMAIL", "invalid address").build())
        .await;
    let report = h
        .handler
        .handle(CanonicalError::validation("BAD_EMAIL", "invalid address").build())
        .await;

    // Warning routes to Slack, which the harness enables
    assert_eq!(
        report.alert.as_ref().map(|a| a.delivered().to_vec()),
        Some(vec![ChannelKind::Slack])
    );
}
