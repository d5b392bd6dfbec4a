//! Logging setup with a reloadable filter and optional rolling log files.
//!
//! This module provides:
//! - Console output with local timezone timestamps
//! - Daily rolling log files through a non-blocking writer
//! - Runtime log level changes via `tracing_subscriber::reload`

use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "autoencode=info,process_utils=info";

/// Prefix of rolled log files.
const LOG_FILE_PREFIX: &str = "autoencode.log";

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Emit JSON lines to the log file instead of plain text.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            log_dir: None,
            json: false,
        }
    }
}

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Live handle to the installed subscriber.
///
/// Dropping it flushes and stops the file writer, so keep it alive for the
/// lifetime of the process.
pub struct LoggingHandle {
    handle: FilterHandle,
    _guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the active filter directive.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

/// Build the filter from `RUST_LOG`, falling back to the configured directive.
fn build_filter(config: &LoggingConfig) -> crate::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e))),
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> crate::Result<LoggingHandle> {
    let (filter, handle) = reload::Layer::new(build_filter(config)?);

    let console_layer = fmt::layer().with_timer(LocalTimer).with_target(true);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_timer(LocalTimer)
                    .boxed()
            } else {
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_timer(LocalTimer)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to install subscriber: {}", e)))?;

    Ok(LoggingHandle {
        handle,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, DEFAULT_LOG_FILTER);
        assert!(config.log_dir.is_none());
        assert!(!config.json);
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoggingConfig = serde_json::from_str(r#"{"log_dir": "logs"}"#).unwrap();
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
        assert_eq!(config.filter, DEFAULT_LOG_FILTER);
    }
}
