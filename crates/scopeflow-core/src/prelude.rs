/*!
 * Prelude module for ScopeFlow Core.
 *
 * This module re-exports commonly used types and functions from the ScopeFlow Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Value};

// Re-export event types
pub use crate::event::{EventBus, EventReceiver, SharedEventBus};

// Re-export config types
pub use crate::config::{AcquisitionConfig, Config, ConfigBuilder, RemoteConfig, SharedConfig};

// Re-export utility functions
pub use crate::utils::{
    duration_to_millis, millis_to_duration, spawn_and_log, with_retry, with_timeout,
};

// Re-export logging helpers and macros
pub use crate::log_with_fields;
pub use crate::logging::{device_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
