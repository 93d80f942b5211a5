//! faultline - operator CLI
//!
//! Validates configuration, sends test alerts through the configured
//! channels and replays synthetic failures through the error handler.

use clap::{Parser, Subcommand};
use faultline::{
    logging::{init_logging, LogConfig},
    Alert, AlertDispatcher, AlertSeverity, CanonicalError, Category, ChannelKind, ErrorHandler,
    FaultlineConfig, InMemoryMetricsSink, RecoveryStrategy, Result, Severity,
};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

/// faultline error handling toolkit
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(about = "Inspect and exercise faultline error handling and alerting")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "FAULTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate configuration, then print the effective settings
    CheckConfig,

    /// Send one alert through the configured channels
    TestAlert {
        #[arg(long, default_value = "info")]
        severity: AlertSeverity,

        #[arg(long, default_value = "faultline test alert")]
        title: String,

        #[arg(long, default_value = "Sent with `faultline test-alert`")]
        message: String,

        /// Target channel; repeat for several (default: severity routing)
        #[arg(long = "channel", value_parser = parse_enum::<ChannelKind>)]
        channels: Vec<ChannelKind>,
    },

    /// Push synthetic failures through the error handler
    Simulate {
        #[arg(long, default_value = "system", value_parser = parse_enum::<Category>)]
        category: Category,

        #[arg(long, default_value = "SIMULATED_FAILURE")]
        code: String,

        #[arg(long, default_value = "medium", value_parser = parse_enum::<Severity>)]
        severity: Severity,

        /// Recovery strategy; the error is unrecoverable without one
        #[arg(long, value_parser = parse_enum::<RecoveryStrategy>)]
        recovery: Option<RecoveryStrategy>,

        /// Number of failures to handle
        #[arg(long, short = 'n', default_value_t = 1)]
        count: u32,

        #[arg(long, default_value = "simulated failure")]
        message: String,
    },
}

/// Parse a snake_case enum the way it is spelled in configuration
fn parse_enum<T: DeserializeOwned>(value: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| format!("unknown value '{value}'"))
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        let config = LogConfig::from_env().with_level(if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        });
        if self.json_logs {
            config.with_json(true)
        } else {
            config
        }
    }

    fn load_config(&self) -> Result<FaultlineConfig> {
        let config = FaultlineConfig::load(self.config.as_deref())?;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_config())?;

    match &cli.command {
        Command::CheckConfig => check_config(&cli),
        Command::TestAlert {
            severity,
            title,
            message,
            channels,
        } => {
            let mut alert = Alert::new(*severity, title.as_str(), message.as_str())
                .with_tag("test");
            if !channels.is_empty() {
                alert = alert.with_channels(channels.clone());
            }
            test_alert(&cli, alert).await
        }
        Command::Simulate {
            category,
            code,
            severity,
            recovery,
            count,
            message,
        } => {
            let mut builder =
                CanonicalError::builder(*category, code.as_str(), message.as_str())
                    .severity(*severity)
                    .context("simulated", true);
            if let Some(strategy) = recovery {
                builder = builder.recoverable(*strategy);
            }
            simulate(&cli, builder.build(), *count).await
        }
    }
}

fn check_config(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    info!("Configuration is valid");
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn test_alert(cli: &Cli, alert: Alert) -> Result<()> {
    let config = cli.load_config()?;
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let dispatcher = AlertDispatcher::from_config(&config.alerting, metrics)?;

    let outcome = dispatcher.send(alert).await;
    println!("{outcome:#?}");
    Ok(())
}

async fn simulate(cli: &Cli, template: CanonicalError, count: u32) -> Result<()> {
    let config = cli.load_config()?;
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let handler = ErrorHandler::builder()
        .config(config)
        .metrics(metrics.clone())
        .build()?;

    let mut last_report = None;
    for _ in 0..count {
        // Same kind each time, fresh id per occurrence
        let error = CanonicalError::builder(template.category(), template.code(), template.message())
            .severity(template.severity())
            .context("simulated", true);
        let error = match template.recovery() {
            Some(strategy) => error.recoverable(strategy),
            None => error,
        };
        last_report = Some(handler.handle(error.build()).await);
    }

    if let Some(report) = &last_report {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    let key = template.key();
    println!("failures[{key}] = {}", handler.failures().count(template.category(), template.code()).await);
    println!("breaker[{key}] = {}", handler.breakers().get_state(&key).await);
    println!("alerts in history = {}", handler.dispatcher().history().await.len());

    let mut counters: Vec<_> = metrics.counters().into_iter().collect();
    counters.sort();
    for (series, value) in counters {
        println!("{series} = {value}");
    }

    handler.shutdown();
    Ok(())
}
