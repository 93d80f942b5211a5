//! Canonical error taxonomy
//!
//! Every failure that reaches the [`ErrorHandler`](crate::handler::ErrorHandler)
//! is turned into a [`CanonicalError`]: severity × category × stable code,
//! plus context and an optional recovery strategy. Records are immutable once
//! built; per-kind state lives in registries keyed by [`CanonicalError::key`].

pub mod normalizer;

pub use normalizer::{ErrorNormalizer, Failure, UNKNOWN_ERROR_CODE};

use crate::context::AmbientContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Validation,
    Authentication,
    Authorization,
    Network,
    Database,
    BusinessLogic,
    System,
    ExternalService,
    Configuration,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Validation => "validation",
            Category::Authentication => "authentication",
            Category::Authorization => "authorization",
            Category::Network => "network",
            Category::Database => "database",
            Category::BusinessLogic => "business_logic",
            Category::System => "system",
            Category::ExternalService => "external_service",
            Category::Configuration => "configuration",
        }
    }

    /// Registry key for a (category, code) pair
    pub fn key_for(&self, code: &str) -> String {
        format!("{}:{}", self.as_str(), code)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared automatic recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreak,
    Compensate,
    Escalate,
    Ignore,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::CircuitBreak => "circuit_break",
            RecoveryStrategy::Compensate => "compensate",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, canonical description of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalError {
    id: Uuid,
    timestamp: DateTime<Utc>,
    severity: Severity,
    category: Category,
    code: String,
    message: String,
    context: HashMap<String, serde_json::Value>,
    recoverable: bool,
    recovery: Option<RecoveryStrategy>,
    remediation: Option<String>,
    cause: Option<String>,
    ambient: AmbientContext,
}

impl CanonicalError {
    /// Start building a canonical error
    pub fn builder<C, M>(category: Category, code: C, message: M) -> CanonicalErrorBuilder
    where
        C: Into<String>,
        M: Into<String>,
    {
        CanonicalErrorBuilder::new(category, code.into(), message.into())
    }

    /// Input validation failure: low severity, not recoverable
    pub fn validation<C: Into<String>, M: Into<String>>(code: C, message: M) -> CanonicalErrorBuilder {
        Self::builder(Category::Validation, code, message).severity(Severity::Low)
    }

    pub fn authentication<C: Into<String>, M: Into<String>>(
        code: C,
        message: M,
    ) -> CanonicalErrorBuilder {
        Self::builder(Category::Authentication, code, message)
            .severity(Severity::Medium)
            .remediation("Verify credentials and re-authenticate")
    }

    pub fn authorization<C: Into<String>, M: Into<String>>(
        code: C,
        message: M,
    ) -> CanonicalErrorBuilder {
        Self::builder(Category::Authorization, code, message).severity(Severity::Medium)
    }

    /// Network failure: retried by default
    pub fn network<C: Into<String>, M: Into<String>>(code: C, message: M) -> CanonicalErrorBuilder {
        Self::builder(Category::Network, code, message)
            .severity(Severity::Medium)
            .recoverable(RecoveryStrategy::Retry)
    }

    /// Database failure: high severity, retried by default
    pub fn database<C: Into<String>, M: Into<String>>(code: C, message: M) -> CanonicalErrorBuilder {
        Self::builder(Category::Database, code, message)
            .severity(Severity::High)
            .recoverable(RecoveryStrategy::Retry)
    }

    pub fn business_logic<C: Into<String>, M: Into<String>>(
        code: C,
        message: M,
    ) -> CanonicalErrorBuilder {
        Self::builder(Category::BusinessLogic, code, message).severity(Severity::Low)
    }

    pub fn system<C: Into<String>, M: Into<String>>(code: C, message: M) -> CanonicalErrorBuilder {
        Self::builder(Category::System, code, message).severity(Severity::High)
    }

    /// Upstream dependency failure: trips the circuit breaker by default
    pub fn external_service<C: Into<String>, M: Into<String>>(
        code: C,
        message: M,
    ) -> CanonicalErrorBuilder {
        Self::builder(Category::ExternalService, code, message)
            .severity(Severity::High)
            .recoverable(RecoveryStrategy::CircuitBreak)
    }

    /// Misconfiguration: critical, a human has to fix it
    pub fn configuration<C: Into<String>, M: Into<String>>(
        code: C,
        message: M,
    ) -> CanonicalErrorBuilder {
        Self::builder(Category::Configuration, code, message)
            .severity(Severity::Critical)
            .remediation("Check the service configuration and restart")
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn recovery(&self) -> Option<RecoveryStrategy> {
        self.recovery
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn ambient(&self) -> &AmbientContext {
        &self.ambient
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.ambient.correlation_id.as_deref()
    }

    /// `category:code`, the key shared by every per-kind registry
    pub fn key(&self) -> String {
        self.category.key_for(&self.code)
    }
}

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.key(), self.message)
    }
}

impl std::error::Error for CanonicalError {}

/// Builder for [`CanonicalError`]
#[derive(Debug, Clone)]
pub struct CanonicalErrorBuilder {
    severity: Severity,
    category: Category,
    code: String,
    message: String,
    context: HashMap<String, serde_json::Value>,
    recoverable: bool,
    recovery: Option<RecoveryStrategy>,
    remediation: Option<String>,
    cause: Option<String>,
    ambient: Option<AmbientContext>,
}

impl CanonicalErrorBuilder {
    fn new(category: Category, code: String, message: String) -> Self {
        Self {
            severity: Severity::Medium,
            category,
            code,
            message,
            context: HashMap::new(),
            recoverable: false,
            recovery: None,
            remediation: None,
            cause: None,
            ambient: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Mark recoverable with the given strategy
    pub fn recoverable(mut self, strategy: RecoveryStrategy) -> Self {
        self.recoverable = true;
        self.recovery = Some(strategy);
        self
    }

    /// Mark not recoverable, clearing any strategy
    pub fn unrecoverable(mut self) -> Self {
        self.recoverable = false;
        self.recovery = None;
        self
    }

    pub fn remediation<S: Into<String>>(mut self, hint: S) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    /// Add context to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Record the causing failure, rendered with its source chain
    pub fn cause(mut self, cause: &(dyn std::error::Error + 'static)) -> Self {
        self.cause = Some(render_chain(cause));
        self
    }

    pub fn cause_message<S: Into<String>>(mut self, cause: S) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Use an explicit ambient context instead of the current task's
    pub fn ambient(mut self, ambient: AmbientContext) -> Self {
        self.ambient = Some(ambient);
        self
    }

    pub fn build(self) -> CanonicalError {
        let ambient = self.ambient.clone().unwrap_or_else(AmbientContext::current);
        self.build_with(ambient)
    }

    pub(crate) fn build_with(self, fallback_ambient: AmbientContext) -> CanonicalError {
        CanonicalError {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: self.severity,
            category: self.category,
            code: self.code,
            message: self.message,
            context: self.context,
            recoverable: self.recoverable,
            recovery: self.recovery,
            remediation: self.remediation,
            cause: self.cause,
            ambient: self.ambient.unwrap_or(fallback_ambient),
        }
    }
}

/// "outer: inner: root" rendering of an error and its sources
pub(crate) fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}
