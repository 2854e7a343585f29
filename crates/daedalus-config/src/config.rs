//! Main configuration types.
//!
//! This module provides the top-level [`DaedalusConfig`] struct and its builder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConfigError, LogFormat, RunMode, RuntimeConfig, TelemetryConfigSection};

/// Log levels accepted as the first directive of `telemetry.logging.level`.
const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Complete Daedalus application configuration.
///
/// `values` is an opaque table of application settings. The framework never
/// interprets it; applications receive it through the public `config`
/// definition.
///
/// # Example
///
/// ```
/// use daedalus_config::{DaedalusConfig, RunMode};
///
/// let config = DaedalusConfig::default();
/// assert_eq!(config.runtime.mode, RunMode::Process);
/// assert!(config.values.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DaedalusConfig {
    /// Runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,

    /// Application values.
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl DaedalusConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_config::{DaedalusConfig, RunMode};
    ///
    /// let config = DaedalusConfig::builder()
    ///     .mode(RunMode::Server)
    ///     .value("greeting", "hello")
    ///     .build();
    ///
    /// assert_eq!(config.runtime.mode, RunMode::Server);
    /// assert_eq!(config.value("greeting"), Some(&serde_json::json!("hello")));
    /// ```
    #[must_use]
    pub fn builder() -> DaedalusConfigBuilder {
        DaedalusConfigBuilder::new()
    }

    /// Looks up an application value by dotted path (`db.pool.size`).
    #[must_use]
    pub fn value(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Returns the application values as a single JSON object.
    #[must_use]
    pub fn values_json(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The service name is empty
    /// - The log level does not start with a known level
    /// - Metrics are enabled with an invalid address
    /// - Histogram buckets are empty or not strictly increasing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telemetry.service_name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "telemetry.service_name",
                "must not be empty",
            ));
        }

        let level = &self.telemetry.logging.level;
        let first = level.split(',').next().unwrap_or_default().trim();
        if !first.contains('=') && !LOG_LEVELS.contains(&first.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                format!("unknown log level: {level}"),
            ));
        }

        let metrics = &self.telemetry.metrics;
        if metrics.enabled && metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", metrics.addr),
            ));
        }

        if metrics.histogram_buckets.is_empty()
            || metrics.histogram_buckets.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.histogram_buckets",
                "must be non-empty and strictly increasing",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// - Pretty log formatting with ANSI colors and source locations
    /// - Debug log level
    /// - Metrics disabled
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_config::DaedalusConfig;
    ///
    /// let config = DaedalusConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();

        config
    }

    /// Create a production configuration preset.
    ///
    /// - JSON log formatting at info level
    /// - Server run mode, so module singletons never cross requests
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_config::{DaedalusConfig, LogFormat, RunMode};
    ///
    /// let config = DaedalusConfig::production();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    /// assert_eq!(config.runtime.mode, RunMode::Server);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.environment = "production".to_string();
        config.runtime.mode = RunMode::Server;

        config
    }
}

/// Builder for [`DaedalusConfig`].
#[derive(Debug, Default)]
pub struct DaedalusConfigBuilder {
    runtime: Option<RuntimeConfig>,
    telemetry: Option<TelemetryConfigSection>,
    values: Map<String, Value>,
}

impl DaedalusConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime configuration.
    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set only the run mode.
    #[must_use]
    pub fn mode(self, mode: RunMode) -> Self {
        self.runtime(RuntimeConfig { mode })
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set one application value.
    #[must_use]
    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections use their default values.
    #[must_use]
    pub fn build(self) -> DaedalusConfig {
        DaedalusConfig {
            runtime: self.runtime.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
            values: self.values,
        }
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<DaedalusConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
