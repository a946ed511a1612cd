//! Logging and tracing setup
//!
//! Pretty console output for development, JSON files with daily rotation for
//! production. `RUST_LOG` overrides the configured filter.

use std::path::PathBuf;

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::Settings;

const LOG_FILE_PREFIX: &str = "dbwarden.log";

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Directory where log files should be written
    pub log_dir: PathBuf,

    /// Whether to write JSON lines to rolling files
    pub enable_json_logs: bool,

    /// Whether to enable pretty console output
    pub enable_console_logs: bool,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close events
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: true,
            enable_console_logs: true,
            include_location: cfg!(debug_assertions),
            enable_spans: cfg!(debug_assertions),
            default_filter: "info,dbwarden_core=debug,dbwarden_connection=debug,dbwarden_driver_postgres=debug".to_string(),
        }
    }
}

/// Optional `[logging]` table in the settings files
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    dir: Option<PathBuf>,
    json: Option<bool>,
    console: Option<bool>,
    location: Option<bool>,
    spans: Option<bool>,
    filter: Option<String>,
}

impl LoggingConfig {
    /// JSON files only, quieter filter
    pub fn production() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: true,
            enable_console_logs: false,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,dbwarden_connection=info,dbwarden_driver_postgres=info".to_string(),
        }
    }

    pub fn development() -> Self {
        Self::default()
    }

    /// Console only, no files
    pub fn testing() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("dbwarden-tests"),
            enable_json_logs: false,
            enable_console_logs: true,
            include_location: true,
            enable_spans: false,
            default_filter: "debug".to_string(),
        }
    }

    /// Preset for the environment name, adjusted by the `logging` settings table
    pub fn from_settings(settings: &Settings, environment: &str) -> dbwarden_core::Result<Self> {
        let mut config = match environment {
            "production" => Self::production(),
            "test" | "testing" => Self::testing(),
            _ => Self::development(),
        };

        if !settings.has("logging") {
            return Ok(config);
        }
        let section: LoggingSection = settings.get("logging")?;
        if let Some(dir) = section.dir {
            config.log_dir = dir;
        }
        if let Some(json) = section.json {
            config.enable_json_logs = json;
        }
        if let Some(console) = section.console {
            config.enable_console_logs = console;
        }
        if let Some(location) = section.location {
            config.include_location = location;
        }
        if let Some(spans) = section.spans {
            config.enable_spans = spans;
        }
        if let Some(filter) = section.filter {
            config.default_filter = filter;
        }
        Ok(config)
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process. Fails if a global subscriber is already set.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter))
    };

    // NEW/CLOSE only: ENTER fires on every re-poll of an awaited future
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = None;

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true)
            .pretty()
            .with_filter(env_filter())
            .boxed();
        layers.push(console_layer);
    }

    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter())
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "Logging system initialized"
    );

    Ok(guard)
}

/// Initialize from the layered settings for the current environment
pub fn init_from_settings(settings: &Settings) -> anyhow::Result<Option<WorkerGuard>> {
    let config = LoggingConfig::from_settings(settings, &crate::environment())?;
    init(config)
}

/// Default location for log files
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dbwarden")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_presets() {
        let production = LoggingConfig::production();
        assert!(production.enable_json_logs);
        assert!(!production.enable_console_logs);

        let testing = LoggingConfig::testing();
        assert!(!testing.enable_json_logs);
        assert_eq!(testing.default_filter, "debug");

        assert_eq!(LoggingConfig::development(), LoggingConfig::default());
        assert!(log_directory().ends_with("dbwarden/logs"));
    }

    #[test]
    fn test_from_settings_applies_overrides() {
        let settings = Settings::from_value(json!({
            "logging": { "dir": "/var/log/reports", "console": true, "filter": "warn" }
        }))
        .unwrap();

        let config = LoggingConfig::from_settings(&settings, "production").unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/reports"));
        assert!(config.enable_console_logs);
        assert!(config.enable_json_logs);
        assert_eq!(config.default_filter, "warn");
    }

    #[test]
    fn test_from_settings_without_section() {
        let settings = Settings::from_value(json!({ "db": {} })).unwrap();
        let config = LoggingConfig::from_settings(&settings, "test").unwrap();
        assert_eq!(config, LoggingConfig::testing());
    }

    #[test]
    fn test_from_settings_rejects_bad_types() {
        let settings = Settings::from_value(json!({ "logging": { "json": "sometimes" } })).unwrap();
        assert!(LoggingConfig::from_settings(&settings, "development").is_err());
    }
}
