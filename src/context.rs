//! Ambient request context captured into every canonical error
//!
//! The host application scopes an [`AmbientContext`] around the work it does
//! for a request; errors created inside that scope pick up the correlation
//! fields automatically.

use serde::{Deserialize, Serialize};
use std::future::Future;

tokio::task_local! {
    static CURRENT: AmbientContext;
}

/// Correlation fields of the caller's execution context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientContext {
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: Option<String>,
}

impl AmbientContext {
    /// Context carrying only a correlation id
    pub fn with_correlation_id<S: Into<String>>(id: S) -> Self {
        Self {
            correlation_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn user_id<S: Into<String>>(mut self, id: S) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn session_id<S: Into<String>>(mut self, id: S) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn trace_id<S: Into<String>>(mut self, id: S) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    /// Run `fut` with this context installed for the current task
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// Context of the current task, or an empty one outside any scope
    pub fn current() -> Self {
        CURRENT.try_with(|ctx| ctx.clone()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none()
            && self.user_id.is_none()
            && self.session_id.is_none()
            && self.trace_id.is_none()
    }
}

/// Source of ambient context, read-only from faultline's point of view
pub trait ContextProvider: Send + Sync {
    fn current(&self) -> AmbientContext;
}

/// Reads the context installed with [`AmbientContext::scope`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLocalContextProvider;

impl ContextProvider for TaskLocalContextProvider {
    fn current(&self) -> AmbientContext {
        AmbientContext::current()
    }
}
