//! Logging configuration and initialization
//!
//! Centralized tracing setup for all Depot components. Supports console
//! and/or daily-rotated file output, text or JSON formatting, and
//! environment-based configuration.
//!
//! Use structured logging macros (`trace!`, `debug!`, `info!`, `warn!`,
//! `error!`) with fields rather than `println!`:
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(load_id = %load_id, files = count, "Populated load table");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Minimum level of messages to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Where log output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Text for humans, JSON for log aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Output target (console, file, or both)
    pub output: LogOutput,
    /// Log format (text or JSON)
    pub format: LogFormat,
    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,
    /// Log file name prefix (e.g. "depot" -> "depot.2026-01-18.log")
    pub log_file_prefix: String,
    /// Additional filter directives (e.g. "sqlx=warn,aws_sdk_s3=warn")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "depot".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`,
    /// `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.output = output.parse()?;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup; a second call returns an error from the
/// underlying registry.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    let console = matches!(config.output, LogOutput::Console | LogOutput::Both);
    let file = matches!(config.output, LogOutput::File | LogOutput::Both);

    let file_writer = if file {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
        let appender =
            tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        // The guard must outlive the program for buffered lines to flush.
        std::mem::forget(guard);
        Some(non_blocking)
    } else {
        None
    };

    let console_layer = console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_span_events(FmtSpan::CLOSE)
    });
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
    });

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer.map(|l| l.boxed()))
                .with(file_layer.map(|l| l.boxed()))
                .try_init()?;
        },
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer.map(|l| l.json().boxed()))
                .with(file_layer.map(|l| l.json().boxed()))
                .try_init()?;
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("invalid".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("console".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("file".parse::<LogOutput>().unwrap(), LogOutput::File);
        assert_eq!("both".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert!("invalid".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.log_file_prefix, "depot");
    }
}
