//! Logging configuration from the environment and subscriber setup for the batch binaries.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
    /// Tag lines with the worker thread; useful when customers run on the rayon pool.
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: true,
            include_thread_ids: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("OFFERLINE_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("OFFERLINE_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("OFFERLINE_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    if let Ok(threads) = env::var("OFFERLINE_LOG_THREADS") {
        if let Some(parsed) = parse_bool(&threads) {
            config.include_thread_ids = parsed;
        }
    }

    config
}

/// Installs the global subscriber. Output goes to stderr so binaries can stream
/// tables on stdout.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish())?,
    }

    Ok(())
}

pub fn log_run_start(command: &str, config: &LoggingConfig) {
    info!(
        component = command,
        event = "run.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_inputs_loaded(
    command: &str,
    offers: usize,
    profiles: usize,
    events: usize,
    horizons: &[i64],
) {
    info!(
        component = command,
        event = "inputs.loaded",
        offers,
        profiles,
        events,
        horizons = ?horizons
    );
}

pub fn log_output_written(command: &str, path: &Path, rows: u64, elapsed_ms: Option<u128>) {
    match elapsed_ms {
        Some(elapsed_ms) => info!(
            component = command,
            event = "output.written",
            path = %path.display(),
            rows,
            elapsed_ms = elapsed_ms as u64
        ),
        None => info!(
            component = command,
            event = "output.written",
            path = %path.display(),
            rows
        ),
    }
}

pub fn log_run_failed(command: &str, err: &dyn std::error::Error) {
    error!(
        component = command,
        event = "run.failed",
        error = %err
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

/// Env flag parsing shared by the logging and pipeline configs.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
