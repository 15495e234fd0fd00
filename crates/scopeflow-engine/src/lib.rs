/*!
 * ScopeFlow Engine
 *
 * This crate provides synchronized acquisition across several devices:
 * acquisition groups sharing one trigger, the controller that builds them
 * from registered devices, and per-member outcome reports.
 */

#![warn(missing_docs)]

// Re-export core types
pub use scopeflow_core::prelude;

pub mod controller;
pub mod error;
pub mod group;
pub mod outcome;

// Re-export main types for convenience
pub use controller::Controller;
pub use error::{GroupError, Result};
pub use group::{AcquisitionGroup, GroupBuilder};
pub use outcome::{GroupAcquisition, MemberOutcome, MemberStatus};

/// ScopeFlow engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("ScopeFlow Engine {} initialized", VERSION);
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
