//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a [`DaedalusConfig`](crate::DaedalusConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("no configuration file at {path}")]
    MissingFile {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A configuration file exists but could not be read.
    #[error("cannot read configuration file {path}")]
    Read {
        /// The file being read.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML.
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON, or a merged document that no longer fits the schema.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A file extension or format name other than `toml` or `json`.
    #[error("configuration format '{format}' is neither toml nor json")]
    UnsupportedFormat {
        /// The rejected extension or format name.
        format: String,
    },

    /// A loaded value failed validation.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A `DAEDALUS__...` style override could not be applied.
    #[error("environment override {var}: {reason}")]
    EnvOverride {
        /// The variable name.
        var: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An explicitly requested `.env` file failed to load.
    #[error("cannot load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

impl ConfigError {
    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub(crate) fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_override(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            reason: reason.into(),
        }
    }
}
