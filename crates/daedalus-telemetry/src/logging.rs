//! Structured logging for Daedalus.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a pretty formatter. Every crate of the framework logs through
//! `tracing` with the field names in [`fields`].
//!
//! # Example
//!
//! ```rust,ignore
//! use daedalus_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::development())?;
//!
//! tracing::info!(module = "orders", run_id = %run_id, "run started");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use daedalus_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "warn,daedalus_core=debug").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to emit ANSI colors.
    pub ansi: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name reported when logging starts.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
            ansi: false,
            include_target: true,
            service_name: "daedalus-app".to_string(),
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
            file_line_info: true,
            ansi: true,
            ..Self::default()
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Builds a logging configuration from the `telemetry.logging` section.
    #[must_use]
    pub fn from_section(section: &LoggingConfig, service_name: &str) -> Self {
        Self {
            enabled: section.enabled,
            level: section.level.clone(),
            format: section.format,
            span_events: false,
            file_line_info: section.include_location,
            ansi: section.ansi_enabled,
            include_target: true,
            service_name: service_name.to_string(),
        }
    }
}

/// Initializes the logging subsystem.
///
/// A `RUST_LOG` environment variable, when set and valid, replaces the
/// configured level.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => create_env_filter(&config.level)?,
    };

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_ansi(false)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_ansi(config.ansi)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    tracing::info!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Run identifier (UUID v7).
    pub const RUN_ID: &str = "run_id";

    /// Module name.
    pub const MODULE: &str = "module";

    /// Plugin name.
    pub const PLUGIN: &str = "plugin";

    /// Pipeline stage.
    pub const STAGE: &str = "stage";

    /// Middleware name.
    pub const MIDDLEWARE: &str = "middleware";

    /// Definition name.
    pub const DEFINITION: &str = "definition";

    /// Mediator event name.
    pub const EVENT: &str = "event";

    /// Duration field name (in milliseconds).
    pub const DURATION_MS: &str = "duration_ms";

    /// Error field name.
    pub const ERROR: &str = "error";
}
