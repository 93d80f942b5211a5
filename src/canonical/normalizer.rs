//! Turns arbitrary failures into canonical errors

use super::{render_chain, CanonicalError, Category, Severity};
use crate::context::{AmbientContext, ContextProvider, TaskLocalContextProvider};
use crate::error::FaultlineError;
use std::backtrace::BacktraceStatus;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Code assigned to failures that arrive without a canonical classification
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// Anything that can be handed to the error handler
#[derive(Debug)]
pub enum Failure {
    /// Already classified
    Canonical(CanonicalError),
    /// Any other error value
    Error(anyhow::Error),
    /// A bare message
    Message(String),
}

impl Failure {
    /// Wrap any error type
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Failure::Error(anyhow::Error::new(error))
    }
}

impl From<CanonicalError> for Failure {
    fn from(error: CanonicalError) -> Self {
        Failure::Canonical(error)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Failure::Error(error)
    }
}

impl From<FaultlineError> for Failure {
    fn from(error: FaultlineError) -> Self {
        Failure::from_error(error)
    }
}

impl From<std::io::Error> for Failure {
    fn from(error: std::io::Error) -> Self {
        Failure::from_error(error)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Failure {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match error.downcast::<CanonicalError>() {
            Ok(canonical) => Failure::Canonical(*canonical),
            Err(other) => Failure::Error(anyhow::anyhow!(other)),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Message(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Message(message.to_string())
    }
}

/// Converts failures into [`CanonicalError`]s
pub struct ErrorNormalizer {
    provider: Arc<dyn ContextProvider>,
    capture_stack: bool,
}

impl Default for ErrorNormalizer {
    fn default() -> Self {
        Self::new(Arc::new(TaskLocalContextProvider))
    }
}

impl ErrorNormalizer {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            provider,
            capture_stack: true,
        }
    }

    pub fn with_stack_capture(mut self, enabled: bool) -> Self {
        self.capture_stack = enabled;
        self
    }

    /// Normalize a failure. Canonical input is returned untouched.
    pub fn normalize(&self, failure: impl Into<Failure>) -> CanonicalError {
        let failure = failure.into();
        let failure = match failure {
            Failure::Canonical(error) => return error,
            Failure::Error(error) => match error.downcast::<CanonicalError>() {
                Ok(canonical) => return canonical,
                Err(other) => Failure::Error(other),
            },
            message @ Failure::Message(_) => message,
        };

        let ambient = self.ambient();
        match catch_unwind(AssertUnwindSafe(|| self.synthesize(&failure, ambient.clone()))) {
            Ok(error) => {
                debug!(
                    error_id = %error.id(),
                    code = error.code(),
                    "Normalized unclassified failure"
                );
                error
            }
            Err(_) => {
                warn!("Failure could not be rendered, using minimal canonical record");
                CanonicalError::builder(
                    Category::System,
                    UNKNOWN_ERROR_CODE,
                    "Unrepresentable failure",
                )
                .ambient(ambient)
                .build()
            }
        }
    }

    fn ambient(&self) -> AmbientContext {
        catch_unwind(AssertUnwindSafe(|| self.provider.current())).unwrap_or_default()
    }

    fn synthesize(&self, failure: &Failure, ambient: AmbientContext) -> CanonicalError {
        let (message, chain) = match failure {
            Failure::Error(error) => {
                let root: &(dyn std::error::Error + 'static) = error.as_ref();
                let chain = root.source().map(|_| render_chain(root));
                (error.to_string(), chain)
            }
            Failure::Message(message) => (message.clone(), None),
            Failure::Canonical(error) => (error.message().to_string(), None),
        };

        let mut builder = CanonicalError::builder(Category::System, UNKNOWN_ERROR_CODE, message.clone())
            .severity(Severity::Medium)
            .unrecoverable()
            .context("message", message)
            .ambient(ambient);

        if let Some(chain) = chain {
            builder = builder
                .context("source_chain", chain.clone())
                .cause_message(chain);
        }

        if let Failure::Error(error) = failure {
            if let Some(inner) = error.downcast_ref::<FaultlineError>() {
                builder = builder.context("error_type", inner.error_type());
            }
        }

        if let Some(stack) = self.stack(failure) {
            builder = builder.context("stack", stack);
        }

        builder.build()
    }

    /// The failure's own backtrace when it carries one, otherwise the
    /// current stack
    fn stack(&self, failure: &Failure) -> Option<String> {
        if !self.capture_stack {
            return None;
        }
        if let Failure::Error(error) = failure {
            let original = error.backtrace();
            if original.status() == BacktraceStatus::Captured {
                return Some(original.to_string());
            }
        }
        Some(format!("{:?}", backtrace::Backtrace::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::RecoveryStrategy;
    use std::fmt;

    #[test]
    fn test_canonical_passthrough_keeps_id() {
        let normalizer = ErrorNormalizer::default();
        let original = CanonicalError::external_service("PAYMENT_GATEWAY_DOWN", "503 from gateway")
            .context("gateway", "acme")
            .build();

        let normalized = normalizer.normalize(original.clone());
        assert_eq!(normalized, original);
        assert_eq!(normalized.id(), original.id());
    }

    #[test]
    fn test_canonical_inside_anyhow_is_recovered() {
        let normalizer = ErrorNormalizer::default();
        let original = CanonicalError::network("DNS_FAILURE", "lookup failed").build();
        let id = original.id();

        let normalized = normalizer.normalize(anyhow::Error::new(original));
        assert_eq!(normalized.id(), id);
        assert_eq!(normalized.recovery(), Some(RecoveryStrategy::Retry));
    }

    #[test]
    fn test_boxed_canonical_keeps_identity() {
        let normalizer = ErrorNormalizer::default();
        let original = CanonicalError::external_service("PAYMENT_GATEWAY_DOWN", "503 from gateway")
            .build();
        let id = original.id();

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(original);
        let normalized = normalizer.normalize(boxed);
        assert_eq!(normalized.id(), id);
        assert_eq!(normalized.code(), "PAYMENT_GATEWAY_DOWN");
        assert_eq!(normalized.recovery(), Some(RecoveryStrategy::CircuitBreak));
    }

    #[test]
    fn test_boxed_foreign_error_is_synthesized() {
        let normalizer = ErrorNormalizer::default().with_stack_capture(false);
        let boxed: Box<dyn std::error::Error + Send + Sync> = "pool exhausted".into();

        let normalized = normalizer.normalize(boxed);
        assert_eq!(normalized.code(), UNKNOWN_ERROR_CODE);
        assert_eq!(normalized.message(), "pool exhausted");
    }

    #[test]
    fn test_unknown_error_defaults() {
        let normalizer = ErrorNormalizer::default().with_stack_capture(true);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");

        let normalized = normalizer.normalize(io);
        assert_eq!(normalized.category(), Category::System);
        assert_eq!(normalized.severity(), Severity::Medium);
        assert_eq!(normalized.code(), UNKNOWN_ERROR_CODE);
        assert!(!normalized.is_recoverable());
        assert_eq!(normalized.context()["message"], "disk on fire");
        assert!(normalized.context().contains_key("stack"));
    }

    #[test]
    fn test_source_chain_is_embedded() {
        let normalizer = ErrorNormalizer::default().with_stack_capture(false);
        let err = anyhow::anyhow!("connection reset").context("loading user profile");

        let normalized = normalizer.normalize(err);
        assert_eq!(
            normalized.context()["source_chain"],
            "loading user profile: connection reset"
        );
        assert!(!normalized.context().contains_key("stack"));
    }

    struct Exploding;

    impl fmt::Display for Exploding {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display exploded")
        }
    }

    impl fmt::Debug for Exploding {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Exploding")
        }
    }

    impl std::error::Error for Exploding {}

    #[test]
    fn test_panicking_display_falls_back() {
        let normalizer = ErrorNormalizer::default().with_stack_capture(false);

        let normalized = normalizer.normalize(Failure::from_error(Exploding));
        assert_eq!(normalized.category(), Category::System);
        assert_eq!(normalized.message(), "Unrepresentable failure");
    }
}
