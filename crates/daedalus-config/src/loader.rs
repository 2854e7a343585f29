//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, `.env` files and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{ConfigError, DaedalusConfig, LogFormat, RunMode};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values or a preset
/// 2. Configuration files (TOML or JSON), merged key by key
/// 3. A `.env` file, which only populates the process environment
/// 4. Environment variables `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```no_run
/// use daedalus_config::ConfigLoader;
///
/// # fn main() -> Result<(), daedalus_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("daedalus.toml")?
///     .with_dotenv()?
///     .with_env_prefix("DAEDALUS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: DaedalusConfig,
    env_prefix: Option<String>,
    files_loaded: usize,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DaedalusConfig::default(),
            env_prefix: None,
            files_loaded: 0,
        }
    }

    /// Start with default configuration values.
    ///
    /// This is what `new()` does already; it can be chained for clarity.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = DaedalusConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = DaedalusConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = DaedalusConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (`.toml`) and JSON (`.json`), chosen by extension. Keys
    /// present in the file override the current layer; everything else is
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::missing_file(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.merge(&content, &format)?;
        self.files_loaded += 1;
        debug!(path = %path.display(), "configuration file loaded");

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or
    /// `json`).
    ///
    /// # Example
    ///
    /// ```
    /// use daedalus_config::{ConfigLoader, RunMode};
    ///
    /// let toml = r#"
    ///     [runtime]
    ///     mode = "server"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.runtime.mode, RunMode::Server);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.merge(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "DAEDALUS":
    /// - `DAEDALUS__RUNTIME__MODE=server`
    /// - `DAEDALUS__TELEMETRY__LOGGING__LEVEL=debug`
    /// - `DAEDALUS__VALUES__DB__URL=postgres://db/app`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load the nearest `.env` file into the process environment.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), ".env file loaded"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(self)
    }

    /// Load a specific `.env` file into the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or cannot be parsed.
    pub fn with_dotenv_path<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Returns how many files have been merged so far.
    #[must_use]
    pub fn files_loaded(&self) -> usize {
        self.files_loaded
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed or
    /// validation fails.
    pub fn load(mut self) -> Result<DaedalusConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix, env::vars())?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> DaedalusConfig {
        self.config
    }

    // Parse a layer and merge it into the current config
    fn merge(&mut self, content: &str, format: &str) -> Result<(), ConfigError> {
        // Parse into the typed config first so unknown fields are reported
        // with the right format.
        let layer: Value = match format {
            "toml" => {
                toml::from_str::<DaedalusConfig>(content)?;
                toml::from_str(content)?
            }
            "json" => {
                serde_json::from_str::<DaedalusConfig>(content)?;
                serde_json::from_str(content)?
            }
            other => return Err(ConfigError::unsupported_format(other)),
        };

        let mut current = serde_json::to_value(&self.config)?;
        merge_value(&mut current, layer);
        self.config = serde_json::from_value(current)?;
        Ok(())
    }

    // Apply environment variable overrides
    fn apply_env_overrides<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(&marker))
            .collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    // Apply a single environment variable
    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_override(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let telemetry = &mut self.config.telemetry;

        match parts.as_slice() {
            ["RUNTIME", "MODE"] => {
                self.config.runtime.mode = RunMode::parse(value)
                    .ok_or_else(|| ConfigError::env_override(key, "expected 'process' or 'server'"))?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
            ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),

            ["TELEMETRY", "METRICS", "ENABLED"] => {
                telemetry.metrics.enabled = parse_bool(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => telemetry.metrics.addr = value.to_string(),

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                telemetry.logging.enabled = parse_bool(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_override(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                telemetry.logging.ansi_enabled = parse_bool(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                telemetry.logging.include_location = parse_bool(key, value)?;
            }

            ["VALUES", path @ ..] if !path.is_empty() && path.iter().all(|p| !p.is_empty()) => {
                insert_value(&mut self.config.values, path, parse_value(value));
            }

            _ => warn!(var = key, "ignoring unknown configuration variable"),
        }

        Ok(())
    }
}

/// Parse a boolean from an environment variable.
fn parse_bool(key: &str, s: &str) -> Result<bool, ConfigError> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_override(key, "expected boolean")),
    }
}

/// Environment values are JSON when they parse as JSON, strings otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Inserts `value` under a lowercased nested path, creating tables on the way.
fn insert_value(values: &mut Map<String, Value>, path: &[&str], value: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut table = values;
    for segment in parents {
        let entry = table
            .entry(segment.to_lowercase())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        table = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    table.insert(last.to_lowercase(), value);
}

/// Deep-merges `layer` into `base`. Objects merge key by key; any other
/// value replaces what was there.
fn merge_value(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
