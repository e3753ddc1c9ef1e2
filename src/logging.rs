//! Structured logging for ridelab
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary (or to the embedding service) through [`init_logging`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration, the `[logging]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: LogLevel,

    /// Output format (pretty, json, compact)
    pub format: LogFormat,

    /// Log file path (None for stderr only)
    pub file_path: Option<PathBuf>,

    /// Rotate the log file daily
    pub rotation: bool,

    /// Include span information
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: true,
            include_spans: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(&self) -> String {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
        .to_string()
    }

    /// Raise this level by a `-v` count, saturating at trace
    pub fn raised_by(self, verbosity: u8) -> Self {
        const ORDER: [LogLevel; 5] = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let current = ORDER.iter().position(|l| *l == self).unwrap_or(1);
        ORDER[(current + verbosity as usize).min(ORDER.len() - 1)]
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for terminals
    Pretty,
    /// One JSON object per event
    Json,
    Compact,
}

/// Writer for the JSON log file, daily-rotated or appended in place
fn file_writer(path: &Path, rotation: bool) -> anyhow::Result<BoxMakeWriter> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    if rotation {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ridelab.log");
        Ok(BoxMakeWriter::new(tracing_appender::rolling::daily(dir, name)))
    } else {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BoxMakeWriter::new(Mutex::new(file)))
    }
}

/// Install the global subscriber.
///
/// Events go to stderr so that JSON results written to stdout stay clean;
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ridelab={}", config.level.to_filter())));

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let stderr_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_line_number(true)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(config.include_spans)
            .with_span_list(config.include_spans)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    };

    let file_layer = match &config.file_path {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(file_writer(path, config.rotation)?)
                .with_current_span(config.include_spans)
                .with_span_list(config.include_spans),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        level = ?config.level,
        format = ?config.format,
        file = ?config.file_path,
        "Logging ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_keeps_defaults() {
        let config: LogConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.rotation);
        assert_eq!(config.file_path, None);
    }

    #[test]
    fn test_level_names() {
        let config: LogConfig = toml::from_str("format = \"json\"\nlevel = \"trace\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level.to_filter(), "trace");
        assert!(toml::from_str::<LogConfig>("level = \"loud\"").is_err());
    }

    #[test]
    fn test_verbosity_raises_level() {
        assert_eq!(LogLevel::Warn.raised_by(0), LogLevel::Warn);
        assert_eq!(LogLevel::Warn.raised_by(2), LogLevel::Debug);
        assert_eq!(LogLevel::Warn.raised_by(9), LogLevel::Trace);
        assert_eq!(LogLevel::Error.raised_by(1).to_filter(), "warn");
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("ridelab.log");
        file_writer(&path, false).unwrap();
        assert!(path.exists());
    }
}
