/*!
 * Per-member outcomes and group acquisition records.
 */
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scopeflow_devices::{Acquisition, DeviceError};

/// What happened to one member during a group operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MemberStatus {
    /// The member armed
    Armed,
    /// The member armed and was disarmed again because another member failed
    Disarmed,
    /// The member accepted the trigger
    Triggered,
    /// The member delivered an acquisition
    Acquired {
        /// Device-local sequence number of the acquisition
        sequence: u64,
    },
    /// The member was aborted because another member failed
    Aborted,
    /// The member failed
    Failed(DeviceError),
    /// The member was not asked to do anything
    NotAttempted,
}

/// Outcome of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberOutcome {
    /// Member device name
    pub device: String,
    /// What happened
    pub status: MemberStatus,
}

impl MemberOutcome {
    /// Create an outcome
    pub fn new<S: Into<String>>(device: S, status: MemberStatus) -> Self {
        Self {
            device: device.into(),
            status,
        }
    }

    /// Whether the member itself failed
    pub fn is_failure(&self) -> bool {
        matches!(self.status, MemberStatus::Failed(_))
    }

    /// The member's error, if it failed
    pub fn error(&self) -> Option<&DeviceError> {
        match &self.status {
            MemberStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for MemberOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            MemberStatus::Armed => write!(f, "{}: armed", self.device),
            MemberStatus::Disarmed => write!(f, "{}: disarmed", self.device),
            MemberStatus::Triggered => write!(f, "{}: triggered", self.device),
            MemberStatus::Acquired { sequence } => write!(f, "{}: acquired #{}", self.device, sequence),
            MemberStatus::Aborted => write!(f, "{}: aborted", self.device),
            MemberStatus::Failed(e) => write!(f, "{}: {}", self.device, e.kind),
            MemberStatus::NotAttempted => write!(f, "{}: not attempted", self.device),
        }
    }
}

/// The data of one synchronized trigger across a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAcquisition {
    /// Group name
    pub group: String,
    /// Identifier of this collection
    pub run: Uuid,
    /// Number of collections the group made before this one
    pub cycle: u64,
    /// When collection started
    pub started_at: DateTime<Utc>,
    /// When the last member delivered
    pub finished_at: DateTime<Utc>,
    /// One acquisition per member, in member order
    pub acquisitions: Vec<Acquisition>,
}

impl GroupAcquisition {
    /// Acquisition of one member
    pub fn get(&self, device: &str) -> Option<&Acquisition> {
        self.acquisitions.iter().find(|a| a.device == device)
    }

    /// Member names, in member order
    pub fn devices(&self) -> Vec<&str> {
        self.acquisitions.iter().map(|a| a.device.as_str()).collect()
    }

    /// Time from the start of collection to the last delivery
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Serialize the record to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
