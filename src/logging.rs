//! Logging setup for the faultline binary
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the host. The CLI uses [`init_logging`] to get:
//! - `RUST_LOG`-driven filtering with a default level
//! - compact or JSON output on stderr
//! - an optional daily-rolling log file

use crate::error::{FaultlineError, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Default file name when the log path names only a directory
const DEFAULT_LOG_FILE: &str = "faultline.log";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,

    /// Also log to this file, rotated daily
    pub file_path: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(log_file) = std::env::var("FAULTLINE_LOG_FILE") {
            config.file_path = Some(PathBuf::from(log_file));
        }
        if let Ok(format) = std::env::var("FAULTLINE_LOG_FORMAT") {
            config.json = format.eq_ignore_ascii_case("json");
        }

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer<W>(writer: W, json: bool, ansi: bool, thread_ids: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(thread_ids);

    if json {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.compact().with_ansi(ansi).boxed()
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![output_layer(
        std::io::stderr,
        config.json,
        true,
        config.thread_ids,
    )];

    let mut guard = None;
    if let Some(file_path) = &config.file_path {
        let directory = match file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&directory)?;

        let file_name = file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.into());
        let (writer, worker_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));

        layers.push(output_layer(writer, config.json, false, config.thread_ids));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| FaultlineError::internal(format!("Failed to install logger: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("FAULTLINE_LOG_FILE", Some("/var/log/faultline/app.log")),
                ("FAULTLINE_LOG_FORMAT", Some("JSON")),
            ],
            || {
                let config = LogConfig::from_env();
                assert_eq!(
                    config.file_path,
                    Some(PathBuf::from("/var/log/faultline/app.log"))
                );
                assert!(config.json);
                assert_eq!(config.level, Level::INFO);
            },
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(["FAULTLINE_LOG_FILE", "FAULTLINE_LOG_FORMAT"], || {
            let config = LogConfig::from_env().with_level(Level::DEBUG);
            assert!(config.file_path.is_none());
            assert!(!config.json);
            assert_eq!(config.level, Level::DEBUG);
        });
    }
}
