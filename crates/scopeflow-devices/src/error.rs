/*!
 * Error types for device operations.
 *
 * Every failure names the device and the operation that failed. The kind is
 * serializable so it survives the remote-object boundary unchanged.
 */
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::Capability;
use crate::settings::SettingError;
use crate::state::DeviceState;
use crate::trigger::{TriggerConfig, TriggerRejection};

/// Device operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `initialize`
    Initialize,
    /// `enable`
    Enable,
    /// `disable`
    Disable,
    /// `describe_settings`
    Describe,
    /// `get_setting` / `get_all_settings`
    GetSetting,
    /// `set_setting`
    SetSetting,
    /// `update_settings`
    UpdateSettings,
    /// `arm`
    Arm,
    /// `disarm`
    Disarm,
    /// `trigger`
    Trigger,
    /// `fetch`
    Fetch,
    /// `abort`
    Abort,
    /// `reset`
    Reset,
    /// `shutdown`
    Shutdown,
    /// `position`
    Position,
    /// Any call whose only purpose is to reach the device
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "initialize",
            Operation::Enable => "enable",
            Operation::Disable => "disable",
            Operation::Describe => "describe_settings",
            Operation::GetSetting => "get_setting",
            Operation::SetSetting => "set_setting",
            Operation::UpdateSettings => "update_settings",
            Operation::Arm => "arm",
            Operation::Disarm => "disarm",
            Operation::Trigger => "trigger",
            Operation::Fetch => "fetch",
            Operation::Abort => "abort",
            Operation::Reset => "reset",
            Operation::Shutdown => "shutdown",
            Operation::Position => "position",
            Operation::Connect => "connect",
        };
        f.write_str(name)
    }
}

/// What went wrong
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A value or argument failed validation
    #[error("invalid {subject}: {reason}")]
    Validation {
        /// What was validated (a setting name, `count`, ...)
        subject: String,
        /// Why it was rejected
        reason: String,
    },

    /// The setting cannot be written
    #[error("setting '{0}' is read-only")]
    ImmutableSetting(String),

    /// The setting does not exist
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    /// The operation is not allowed in the current state
    #[error("not allowed in state {state}")]
    InvalidState {
        /// State the device was in
        state: DeviceState,
    },

    /// The trigger configuration is not supported by the device
    #[error("unsupported trigger {config}: {reason}")]
    UnsupportedTrigger {
        /// Requested configuration
        config: TriggerConfig,
        /// Why it was rejected
        reason: String,
    },

    /// The device reported a failure
    #[error("hardware error: {0}")]
    Hardware(String),

    /// No result within the allowed time
    #[error("timed out after {after_ms} ms")]
    Timeout {
        /// Elapsed time in milliseconds
        after_ms: u64,
    },

    /// The pending acquisition was aborted
    #[error("aborted")]
    Aborted,

    /// The device could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// The device lacks the capability the operation needs
    #[error("device is not {0}")]
    Unsupported(Capability),
}

impl From<SettingError> for ErrorKind {
    fn from(err: SettingError) -> Self {
        match err {
            SettingError::Unknown(name) => ErrorKind::UnknownSetting(name),
            SettingError::Immutable(name) => ErrorKind::ImmutableSetting(name),
            SettingError::Rejected { name, reason } => ErrorKind::Validation {
                subject: name,
                reason,
            },
            SettingError::Duplicate(name) => ErrorKind::Validation {
                subject: name,
                reason: "declared twice".to_string(),
            },
        }
    }
}

impl ErrorKind {
    /// Map a trigger rejection for `config`
    pub fn from_rejection(config: TriggerConfig, rejection: TriggerRejection) -> Self {
        match rejection {
            TriggerRejection::InvalidCount(reason) => ErrorKind::Validation {
                subject: "count".to_string(),
                reason,
            },
            other => ErrorKind::UnsupportedTrigger {
                config,
                reason: other.to_string(),
            },
        }
    }
}

/// Error raised by a device operation
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{operation} on device '{device}' failed: {kind}")]
pub struct DeviceError {
    /// Device name
    pub device: String,
    /// Failed operation
    pub operation: Operation,
    /// Failure kind
    pub kind: ErrorKind,
}

impl DeviceError {
    /// Create a new device error
    pub fn new<S: Into<String>>(device: S, operation: Operation, kind: ErrorKind) -> Self {
        Self {
            device: device.into(),
            operation,
            kind,
        }
    }

    /// Invalid state error
    pub fn invalid_state<S: Into<String>>(device: S, operation: Operation, state: DeviceState) -> Self {
        Self::new(device, operation, ErrorKind::InvalidState { state })
    }

    /// Hardware error
    pub fn hardware<S: Into<String>>(device: S, operation: Operation, err: HardwareError) -> Self {
        Self::new(device, operation, ErrorKind::Hardware(err.0))
    }

    /// Connection error
    pub fn connection<S: Into<String>, M: Into<String>>(
        device: S,
        operation: Operation,
        message: M,
    ) -> Self {
        Self::new(device, operation, ErrorKind::Connection(message.into()))
    }

    /// Whether the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    /// Whether the error reports an abort
    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }
}

/// Opaque failure reported by a hardware backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HardwareError(pub String);

impl HardwareError {
    /// Create a hardware error from a message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

/// Result type for hardware backends
pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerMode;

    #[test]
    fn test_error_names_device_and_operation() {
        let err = DeviceError::invalid_state("camera", Operation::Arm, DeviceState::Busy);
        assert_eq!(
            err.to_string(),
            "arm on device 'camera' failed: not allowed in state BUSY"
        );
    }

    #[test]
    fn test_setting_errors_map_to_kinds() {
        assert_eq!(
            ErrorKind::from(SettingError::Immutable("shape".into())),
            ErrorKind::ImmutableSetting("shape".into())
        );
        assert_eq!(
            ErrorKind::from(SettingError::Unknown("offset".into())),
            ErrorKind::UnknownSetting("offset".into())
        );
        assert!(matches!(
            ErrorKind::from(SettingError::Rejected {
                name: "gain".into(),
                reason: "too high".into()
            }),
            ErrorKind::Validation { .. }
        ));
    }

    #[test]
    fn test_trigger_rejections_map_to_kinds() {
        let config = TriggerConfig::software(TriggerMode::Start);
        let kind = ErrorKind::from_rejection(config, TriggerRejection::LineNotWired(2));
        assert!(matches!(kind, ErrorKind::UnsupportedTrigger { .. }));

        let kind = ErrorKind::from_rejection(
            config,
            TriggerRejection::InvalidCount("zero".to_string()),
        );
        assert_eq!(
            kind,
            ErrorKind::Validation {
                subject: "count".to_string(),
                reason: "zero".to_string()
            }
        );
    }

    #[test]
    fn test_error_survives_json() {
        let err = DeviceError::new("stage", Operation::Fetch, ErrorKind::Timeout { after_ms: 20 });
        let json = serde_json::to_string(&err).unwrap();
        let back: DeviceError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.is_timeout());
    }
}
