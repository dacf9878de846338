//! Logging infrastructure for wsmux
//!
//! Provides unified logging setup using the tracing ecosystem.

use std::fs::File;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, Result, WsmuxError};

/// Environment variable that overrides the configured log filter
pub const LOG_ENV_VAR: &str = "WSMUX_LOG";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Log to stderr
    #[default]
    Stderr,
    /// Log to file under the state directory
    File,
    /// Log to both stderr and file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "debug", "wsmux_server=debug,tower=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
        }
    }
}

impl LogConfig {
    /// Create config for the server
    ///
    /// `WSMUX_LOG` wins over the filter passed in.
    pub fn server(output: LogOutput, filter: impl Into<String>) -> Self {
        Self {
            output,
            filter: std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| filter.into()),
            span_events: false,
            file_line: output != LogOutput::Stderr,
        }
    }
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| WsmuxError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let fmt_layer = if config.span_events {
        fmt_layer.with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    } else {
        fmt_layer
    };

    let fmt_layer = fmt_layer
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.output {
        LogOutput::Stderr => registry
            .with(fmt_layer.with_writer(std::io::stderr))
            .try_init(),
        LogOutput::File => registry
            .with(fmt_layer.with_writer(Mutex::new(open_log_file()?)).with_ansi(false))
            .try_init(),
        LogOutput::Both => {
            let file_layer = fmt::layer()
                .with_writer(Mutex::new(open_log_file()?))
                .with_ansi(false)
                .with_target(true);

            registry
                .with(fmt_layer.with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
        }
    };

    result.map_err(|e| WsmuxError::internal(format!("Failed to init logging: {}", e)))
}

/// Open (append) the server log file, creating its directory
fn open_log_file() -> Result<File> {
    let log_dir = paths::log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|e| WsmuxError::FileWrite {
        path: log_dir.clone(),
        source: e,
    })?;

    let log_path = log_dir.join("wsmux.log");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| WsmuxError::FileWrite {
            path: log_path,
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn test_log_config_server_file_line() {
        let config = LogConfig::server(LogOutput::File, "debug");
        assert_eq!(config.output, LogOutput::File);
        assert!(config.file_line);

        let config = LogConfig::server(LogOutput::Stderr, "debug");
        assert!(!config.file_line);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LogConfig {
            filter: "wsmux_server=notalevel".into(),
            ..Default::default()
        };
        assert!(init_logging_with_config(config).is_err());
    }
}
