/*!
 * ScopeFlow Core
 *
 * This crate provides the shared foundations of the ScopeFlow system:
 * error types, setting values, configuration, logging, the event bus and
 * async utilities.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// ScopeFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization with the default log filter
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("ScopeFlow Core {} initialized", VERSION);
    Ok(())
}

/// Library initialization driven by a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_from_config(&config.logging)?;
    tracing::info!(
        "ScopeFlow Core {} initialized for {} ({})",
        VERSION,
        config.general.app_name,
        config.general.environment
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
