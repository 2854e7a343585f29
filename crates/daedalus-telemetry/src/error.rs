//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur during telemetry initialization.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize metrics.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Failed to parse address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already installed".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to initialize metrics: recorder already installed"
        );

        let err = TelemetryError::InvalidAddress("nowhere".to_string());
        assert_eq!(err.to_string(), "Invalid address: nowhere");
    }
}
