/*!
 * Error types for the ScopeFlow engine crate.
 */
use thiserror::Error;

use scopeflow_devices::registry::RegistryError;
use scopeflow_devices::trigger::TriggerSource;
use scopeflow_devices::DeviceError;

use crate::outcome::MemberOutcome;

/// Error type for acquisition group operations
#[derive(Error, Debug, Clone)]
pub enum GroupError {
    /// Some members could not be armed; the ones that armed were disarmed
    #[error("arming group '{group}' failed: {}", failures(.outcomes))]
    PartialArm {
        /// Group name
        group: String,
        /// Outcome of every member
        outcomes: Vec<MemberOutcome>,
    },

    /// A member failed during trigger or fetch; the others were aborted
    #[error("acquisition of group '{group}' failed: {}", failures(.outcomes))]
    GroupAcquisition {
        /// Group name
        group: String,
        /// Outcome of every member
        outcomes: Vec<MemberOutcome>,
    },

    /// A member's trigger source differs from the group's
    #[error("group '{group}': device '{device}' is triggered by {found}, expected {expected}")]
    TriggerMismatch {
        /// Group name
        group: String,
        /// Member name
        device: String,
        /// Source of the group configuration
        expected: TriggerSource,
        /// Source of the member configuration
        found: TriggerSource,
    },

    /// The shared trigger line does not drive the configured source
    #[error("group '{group}': shared line {line} does not drive {configured}")]
    LineMismatch {
        /// Group name
        group: String,
        /// Shared line number
        line: u8,
        /// Configured trigger source
        configured: TriggerSource,
    },

    /// A group needs at least one member
    #[error("group '{0}' has no members")]
    EmptyGroup(String),

    /// A device was added twice
    #[error("device '{device}' appears twice in group '{group}'")]
    DuplicateMember {
        /// Group name
        group: String,
        /// Member name
        device: String,
    },

    /// No device with this name is registered
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// A group with this name already exists
    #[error("group '{0}' already exists")]
    AlreadyExists(String),

    /// No group with this name
    #[error("group '{0}' not found")]
    NotFound(String),

    /// A single device operation failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl GroupError {
    /// Per-member outcomes of an aggregate failure
    pub fn outcomes(&self) -> Option<&[MemberOutcome]> {
        match self {
            GroupError::PartialArm { outcomes, .. }
            | GroupError::GroupAcquisition { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }

    /// Names of the members that failed
    pub fn failed_members(&self) -> Vec<&str> {
        self.outcomes()
            .unwrap_or_default()
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.device.as_str())
            .collect()
    }
}

fn failures(outcomes: &[MemberOutcome]) -> String {
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|o| o.is_failure())
        .map(ToString::to_string)
        .collect();
    if failed.is_empty() {
        "no member reported an error".to_string()
    } else {
        failed.join("; ")
    }
}

/// Result type for ScopeFlow engine operations
pub type Result<T> = std::result::Result<T, GroupError>;
