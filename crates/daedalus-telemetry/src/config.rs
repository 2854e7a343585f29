//! Runtime view of the `telemetry` section.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use daedalus_config::TelemetryConfigSection;

/// Settings handed to [`init_telemetry`](crate::init_telemetry).
///
/// Built from the loaded [`TelemetryConfigSection`]; the service name is
/// copied into the logging settings so every event carries it.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log events.
    pub service_name: String,
    /// Deployment environment, logged once at startup.
    pub environment: String,
    /// Prometheus recorder settings.
    pub metrics: MetricsConfig,
    /// Subscriber settings.
    pub logging: LogConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfigSection::default())
    }
}

impl From<&TelemetryConfigSection> for TelemetryConfig {
    fn from(section: &TelemetryConfigSection) -> Self {
        Self {
            service_name: section.service_name.clone(),
            environment: section.environment.clone(),
            metrics: MetricsConfig::from(&section.metrics),
            logging: LogConfig::from_section(&section.logging, &section.service_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daedalus_config::DaedalusConfig;

    #[test]
    fn test_production_section() {
        let mut section = DaedalusConfig::production().telemetry;
        section.service_name = "orders".to_string();
        let config = TelemetryConfig::from(&section);

        assert_eq!(config.service_name, "orders");
        assert_eq!(config.logging.service_name, "orders");
        assert_eq!(config.environment, section.environment);
        assert_eq!(config.metrics.enabled, section.metrics.enabled);
    }

    #[test]
    fn test_development_section() {
        let config = TelemetryConfig::from(&DaedalusConfig::development().telemetry);

        assert!(!config.metrics.enabled);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.ansi);
    }
}
