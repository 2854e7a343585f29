//! Prometheus metrics for Daedalus.
//!
//! The framework crates record through the `metrics` facade macros; this
//! module installs the Prometheus recorder and HTTP listener that export
//! them.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `daedalus_runs_total` | Counter | `component`, `outcome` | Pipeline runs |
//! | `daedalus_run_duration_seconds` | Histogram | `component` | Run latency |
//! | `daedalus_middleware_invocations_total` | Counter | `stage`, `flow` | Middleware calls |
//! | `daedalus_stage_outcomes_total` | Counter | `stage`, `outcome` | Stage results |
//! | `daedalus_definitions_constructed_total` | Counter | `node`, `factory` | Built instances |
//! | `daedalus_events_emitted_total` | Counter | `event`, `outcome` | Mediator events |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names shared by every crate.
pub mod names {
    /// Pipeline runs by component and outcome.
    pub const RUNS_TOTAL: &str = "daedalus_runs_total";
    /// Run duration histogram.
    pub const RUN_DURATION_SECONDS: &str = "daedalus_run_duration_seconds";
    /// Middleware invocations by stage and flow.
    pub const MIDDLEWARE_INVOCATIONS_TOTAL: &str = "daedalus_middleware_invocations_total";
    /// Stage results.
    pub const STAGE_OUTCOMES_TOTAL: &str = "daedalus_stage_outcomes_total";
    /// Instances built by compiler nodes.
    pub const DEFINITIONS_CONSTRUCTED_TOTAL: &str = "daedalus_definitions_constructed_total";
    /// Mediator events.
    pub const EVENTS_EMITTED_TOTAL: &str = "daedalus_events_emitted_total";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,

    /// Histogram buckets for run duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::from(&daedalus_config::MetricsConfig::default())
    }
}

impl From<&daedalus_config::MetricsConfig> for MetricsConfig {
    fn from(section: &daedalus_config::MetricsConfig) -> Self {
        Self {
            enabled: section.enabled,
            addr: section.addr.clone(),
            duration_buckets: section.histogram_buckets.clone(),
        }
    }
}

/// Read access to the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with the given handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Returns the registry of the globally installed recorder, if any.
    #[must_use]
    pub fn global() -> Option<Self> {
        METRICS_HANDLE.get().cloned().map(Self::new)
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the Prometheus recorder and spawns its HTTP listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError` if the address is invalid, no runtime is
/// available, or a global recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| TelemetryError::MetricsInit(format!("no Tokio runtime: {e}")))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(names::RUN_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    runtime.spawn(async move {
        if let Err(err) = exporter.await {
            tracing::error!(error = ?err, "metrics exporter stopped");
        }
    });

    describe_metrics();
    tracing::info!(%addr, "metrics exporter listening");

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for all standard metrics.
pub fn describe_metrics() {
    describe_counter!(names::RUNS_TOTAL, "Pipeline runs by component and outcome");
    describe_histogram!(
        names::RUN_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Pipeline run duration in seconds"
    );
    describe_counter!(
        names::MIDDLEWARE_INVOCATIONS_TOTAL,
        "Middleware invocations by stage and resulting flow"
    );
    describe_counter!(names::STAGE_OUTCOMES_TOTAL, "Stage results by outcome");
    describe_counter!(
        names::DEFINITIONS_CONSTRUCTED_TOTAL,
        "Instances constructed by compiler nodes"
    );
    describe_counter!(names::EVENTS_EMITTED_TOTAL, "Mediator events by outcome");
}

/// Records a finished run.
///
/// `component` is the requester label (`module:orders`, `plugin:billing`)
/// and `outcome` one of `completed`, `aborted`, `recovered`, `failed`.
pub fn record_run(component: &str, outcome: &'static str, duration: Duration) {
    counter!(
        names::RUNS_TOTAL,
        "component" => component.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::RUN_DURATION_SECONDS,
        "component" => component.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records an emitted mediator event.
pub fn record_event(event: &str, outcome: &'static str) {
    counter!(
        names::EVENTS_EMITTED_TOTAL,
        "event" => event.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_section() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_metrics() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            addr: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_requires_runtime() {
        let config = MetricsConfig {
            addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::MetricsInit(_))
        ));
    }

    #[test]
    fn test_record_functions_without_recorder() {
        record_run("module:orders", "completed", Duration::from_millis(3));
        record_event("order.created", "completed");
        describe_metrics();
    }
}
