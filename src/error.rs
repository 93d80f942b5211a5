//! Error types for the faultline crate itself
//!
//! These are the failures faultline's own machinery can hit: loading
//! configuration, talking to alert channels, running recovery hooks. They
//! never escape `ErrorHandler::handle` or `AlertDispatcher::send`, which log
//! and swallow them.

use thiserror::Error;

/// Result type alias for faultline operations
pub type Result<T> = std::result::Result<T, FaultlineError>;

/// Errors produced by faultline components
#[derive(Error, Debug)]
pub enum FaultlineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// An alert channel rejected or failed to deliver an alert
    #[error("Channel '{channel}' failed: {message}")]
    Channel { channel: String, message: String },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SMTP / message building errors
    #[error("Email error: {0}")]
    Email(String),

    /// A recovery hook reported failure
    #[error("Recovery hook failed: {0}")]
    Recovery(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl FaultlineError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a channel delivery error
    pub fn channel<C: Into<String>, S: Into<String>>(channel: C, msg: S) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Create an email error
    pub fn email<S: Into<String>>(msg: S) -> Self {
        Self::Email(msg.into())
    }

    /// Create a recovery hook error
    pub fn recovery<S: Into<String>>(msg: S) -> Self {
        Self::Recovery(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Generic(anyhow::anyhow!(msg.into()))
    }

    /// Short machine-readable label, used as a metric tag and recorded as
    /// `error_type` context when a `FaultlineError` is normalized
    pub fn error_type(&self) -> &'static str {
        match self {
            FaultlineError::Config(_) | FaultlineError::ConfigLoad(_) => "config_error",
            FaultlineError::Channel { .. } => "channel_error",
            FaultlineError::Http(_) => "http_error",
            FaultlineError::Json(_) => "json_error",
            FaultlineError::Email(_) => "email_error",
            FaultlineError::Recovery(_) => "recovery_error",
            FaultlineError::InvalidInput(_) => "invalid_input_error",
            FaultlineError::Io(_) => "io_error",
            FaultlineError::Generic(_) => "generic_error",
        }
    }

    /// Check if error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            FaultlineError::Http(e) => e.is_timeout() || e.is_connect(),
            FaultlineError::Channel { .. } | FaultlineError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<lettre::error::Error> for FaultlineError {
    fn from(err: lettre::error::Error) -> Self {
        FaultlineError::Email(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for FaultlineError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        FaultlineError::Email(err.to_string())
    }
}

impl From<lettre::address::AddressError> for FaultlineError {
    fn from(err: lettre::address::AddressError) -> Self {
        FaultlineError::Email(format!("Invalid address: {err}"))
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
