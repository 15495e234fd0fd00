/*!
 * Logging functionality for ScopeFlow.
 *
 * This module provides tracing setup and span helpers for consistent logging
 * across devices and acquisition groups.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "scopeflow_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))
}

/// Initialize the logging system from the logging section of the configuration
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    if !config.json_format {
        return init_with_filter(&config.level);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))
}

/// A convenience macro for creating structured logs with fields
#[macro_export]
macro_rules! log_with_fields {
    ($level:expr, $message:expr, $($field:tt)+) => {
        tracing::event!($level, $($field)+, message = $message)
    };
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span covering everything done on behalf of one device
///
/// # Arguments
///
/// * `device` - The device name
pub fn device_span(device: &str) -> Span {
    tracing::info_span!("device", name = %device)
}

/// Create a span for a single device operation
///
/// # Arguments
///
/// * `operation` - The operation name (arm, fetch, ...)
/// * `device` - The device performing the operation
pub fn operation_span(operation: &str, device: &str) -> Span {
    tracing::debug_span!("operation", name = %operation, device = %device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_an_error_not_a_panic() {
        let first = init();
        let second = init();
        // Another test may already have installed a subscriber.
        assert!(first.is_err() || second.is_err());
        if let Err(e) = second {
            assert!(matches!(e, Error::Logging(_)));
        }
    }

    #[test]
    fn test_spans_without_subscriber() {
        let span = device_span("camera");
        let _entered = span.enter();
        let op = operation_span("arm", "camera");
        let _op = op.enter();
    }
}
