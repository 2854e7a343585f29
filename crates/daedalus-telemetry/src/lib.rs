//! Observability for Daedalus: structured logging and Prometheus metrics.
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, JSON or pretty
//! - **Metrics**: the `metrics` facade exported by a Prometheus listener
//!
//! The framework crates only depend on the `tracing` and `metrics` facades.
//! Nothing is emitted anywhere until an application calls
//! [`init_telemetry`] (or the individual `init_*` functions).
//!
//! # Example
//!
//! ```rust,ignore
//! use daedalus_config::DaedalusConfig;
//! use daedalus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DaedalusConfig::production();
//!     init_telemetry(&TelemetryConfig::from(&config.telemetry))?;
//!     Ok(())
//! }
//! ```
//!
//! # Metrics Endpoint
//!
//! ```text
//! # HELP daedalus_runs_total Pipeline runs by component and outcome
//! # TYPE daedalus_runs_total counter
//! daedalus_runs_total{component="module:orders",outcome="completed"} 1234
//! daedalus_runs_total{component="module:orders",outcome="aborted"} 56
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, record_event, record_run, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// Metrics need a running Tokio runtime when enabled.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    tracing::debug!(
        service = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_everything_disabled() {
        let mut config = TelemetryConfig::default();
        config.logging.enabled = false;
        config.metrics.enabled = false;

        assert!(init_telemetry(&config).is_ok());
    }
}
