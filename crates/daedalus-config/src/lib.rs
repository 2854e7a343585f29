//! Typed configuration system for Daedalus.
//!
//! This crate provides a strongly-typed configuration system for Daedalus
//! applications with support for:
//! - TOML and JSON configuration files
//! - `.env` files and environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → `.env` → env)
//!
//! # Overview
//!
//! The configuration is built around [`DaedalusConfig`]:
//!
//! - [`RuntimeConfig`] - run mode (`process` or `server`)
//! - [`TelemetryConfigSection`] - logging and metrics settings
//! - `values` - an opaque table handed to the application as the `config`
//!   definition
//!
//! # Example
//!
//! ```no_run
//! use daedalus_config::ConfigLoader;
//!
//! # fn main() -> Result<(), daedalus_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("daedalus.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("DAEDALUS")
//!     .load()?;
//!
//! println!("running in {} mode", config.runtime.mode.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [runtime]
//! mode = "server"
//!
//! [telemetry]
//! service_name = "orders"
//! environment = "production"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [values]
//! currency = "EUR"
//!
//! [values.db]
//! url = "postgres://localhost/orders"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden via environment variables using the format
//! `PREFIX__SECTION__KEY`. For example:
//!
//! - `DAEDALUS__RUNTIME__MODE=server`
//! - `DAEDALUS__TELEMETRY__METRICS__ENABLED=false`
//! - `DAEDALUS__VALUES__DB__URL=postgres://db/orders`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
