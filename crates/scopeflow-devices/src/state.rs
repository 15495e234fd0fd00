/*!
 * Device lifecycle state machine.
 *
 * The lifecycle is a pure transition table (`next_state`) plus a `Lifecycle`
 * that holds the current state and a bounded history of the transitions taken.
 * Transitions are the only way the state of a device changes.
 */
use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of transitions kept in a lifecycle history by default
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Hardware handshake not yet performed
    Uninitialized,
    /// Initialized but switched off for a period of inactivity
    Disabled,
    /// Idle and ready to be configured or armed
    Enabled,
    /// Prepared to respond to the next trigger
    Armed,
    /// Triggered, acquisition in progress
    Busy,
    /// Unrecoverable hardware error; only `reset` leaves this state
    Fault,
}

impl DeviceState {
    /// Upper-case name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Uninitialized => "UNINITIALIZED",
            DeviceState::Disabled => "DISABLED",
            DeviceState::Enabled => "ENABLED",
            DeviceState::Armed => "ARMED",
            DeviceState::Busy => "BUSY",
            DeviceState::Fault => "FAULT",
        }
    }

    /// Whether an acquisition is pending (armed or busy)
    pub fn is_acquiring(&self) -> bool {
        matches!(self, DeviceState::Armed | DeviceState::Busy)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Hardware handshake: Uninitialized → Enabled
    Initialize,
    /// Disabled → Enabled
    Enable,
    /// Enabled → Disabled
    Disable,
    /// Enabled → Armed
    Arm,
    /// Armed → Busy, on a software trigger or an observed hardware pulse
    Trigger,
    /// Busy → Armed, a `multiple` acquisition waiting for its next trigger
    Rearm,
    /// Busy → Enabled, acquisition finished
    Complete,
    /// Armed → Enabled without acquiring
    Disarm,
    /// Armed/Busy → Enabled, pending data discarded
    Abort,
    /// Any state → Fault
    Fail,
    /// Any state → Enabled, with hardware re-initialization
    Reset,
    /// Any state → Uninitialized
    Shutdown,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Initialize => "initialize",
            Transition::Enable => "enable",
            Transition::Disable => "disable",
            Transition::Arm => "arm",
            Transition::Trigger => "trigger",
            Transition::Rearm => "rearm",
            Transition::Complete => "complete",
            Transition::Disarm => "disarm",
            Transition::Abort => "abort",
            Transition::Fail => "fail",
            Transition::Reset => "reset",
            Transition::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Compute the state reached by applying `transition` in state `from`
///
/// Returns `None` when the transition is not allowed.
pub fn next_state(from: DeviceState, transition: Transition) -> Option<DeviceState> {
    use DeviceState::*;

    match (from, transition) {
        (Uninitialized, Transition::Initialize) => Some(Enabled),
        (Enabled | Disabled, Transition::Enable) => Some(Enabled),
        (Enabled | Disabled, Transition::Disable) => Some(Disabled),
        (Enabled, Transition::Arm) => Some(Armed),
        (Armed, Transition::Trigger) => Some(Busy),
        (Busy, Transition::Rearm) => Some(Armed),
        (Busy, Transition::Complete) => Some(Enabled),
        (Armed, Transition::Disarm) => Some(Enabled),
        (Armed | Busy, Transition::Abort) => Some(Enabled),
        (_, Transition::Fail) => Some(Fault),
        (_, Transition::Reset) => Some(Enabled),
        (_, Transition::Shutdown) => Some(Uninitialized),
        _ => None,
    }
}

/// A transition that is not allowed from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the machine was in
    pub from: DeviceState,
    /// Rejected transition
    pub transition: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} from {}", self.transition, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State before the transition
    pub from: DeviceState,
    /// Transition taken
    pub transition: Transition,
    /// State after the transition
    pub to: DeviceState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Current state plus bounded transition history
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: DeviceState,
    history: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl Lifecycle {
    /// Create a lifecycle in the `Uninitialized` state
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a lifecycle keeping at most `capacity` history records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: DeviceState::Uninitialized,
            history: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether `transition` is allowed from the current state
    pub fn can(&self, transition: Transition) -> bool {
        next_state(self.state, transition).is_some()
    }

    /// Apply a transition, returning the new state
    ///
    /// Transitions that leave the state unchanged are accepted but not recorded.
    pub fn apply(&mut self, transition: Transition) -> Result<DeviceState, InvalidTransition> {
        let from = self.state;
        let to = next_state(from, transition).ok_or(InvalidTransition { from, transition })?;

        if from != to {
            debug!("{} --{}--> {}", from, transition, to);
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(TransitionRecord {
                from,
                transition,
                to,
                at: Utc::now(),
            });
            self.state = to;
        }

        Ok(to)
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.iter().cloned().collect()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), DeviceState::Uninitialized);
        assert!(lifecycle.history().is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.apply(Transition::Initialize).unwrap(), DeviceState::Enabled);
        assert_eq!(lifecycle.apply(Transition::Arm).unwrap(), DeviceState::Armed);
        assert_eq!(lifecycle.apply(Transition::Trigger).unwrap(), DeviceState::Busy);
        assert_eq!(lifecycle.apply(Transition::Complete).unwrap(), DeviceState::Enabled);

        let path: Vec<Transition> = lifecycle.history().iter().map(|r| r.transition).collect();
        assert_eq!(
            path,
            vec![
                Transition::Initialize,
                Transition::Arm,
                Transition::Trigger,
                Transition::Complete
            ]
        );
    }

    #[test]
    fn test_arm_only_from_enabled() {
        for state in [
            DeviceState::Uninitialized,
            DeviceState::Disabled,
            DeviceState::Armed,
            DeviceState::Busy,
            DeviceState::Fault,
        ] {
            assert_eq!(next_state(state, Transition::Arm), None, "arm from {}", state);
        }
        assert_eq!(
            next_state(DeviceState::Enabled, Transition::Arm),
            Some(DeviceState::Armed)
        );
    }

    #[test]
    fn test_fault_is_left_only_by_reset_or_shutdown() {
        for transition in [
            Transition::Initialize,
            Transition::Enable,
            Transition::Disable,
            Transition::Arm,
            Transition::Trigger,
            Transition::Rearm,
            Transition::Complete,
            Transition::Disarm,
            Transition::Abort,
        ] {
            assert_eq!(next_state(DeviceState::Fault, transition), None);
        }
        assert_eq!(
            next_state(DeviceState::Fault, Transition::Reset),
            Some(DeviceState::Enabled)
        );
        assert_eq!(
            next_state(DeviceState::Fault, Transition::Shutdown),
            Some(DeviceState::Uninitialized)
        );
    }

    #[test]
    fn test_any_state_can_fail() {
        for state in [
            DeviceState::Uninitialized,
            DeviceState::Disabled,
            DeviceState::Enabled,
            DeviceState::Armed,
            DeviceState::Busy,
        ] {
            assert_eq!(next_state(state, Transition::Fail), Some(DeviceState::Fault));
        }
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.apply(Transition::Arm).unwrap_err();
        assert_eq!(err.from, DeviceState::Uninitialized);
        assert_eq!(err.transition, Transition::Arm);
        assert_eq!(lifecycle.state(), DeviceState::Uninitialized);
        assert_eq!(err.to_string(), "cannot arm from UNINITIALIZED");
    }

    #[test]
    fn test_noop_transitions_are_not_recorded() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.apply(Transition::Initialize).unwrap();
        lifecycle.apply(Transition::Enable).unwrap();
        assert_eq!(lifecycle.history().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut lifecycle = Lifecycle::with_capacity(3);
        lifecycle.apply(Transition::Initialize).unwrap();
        for _ in 0..5 {
            lifecycle.apply(Transition::Disable).unwrap();
            lifecycle.apply(Transition::Enable).unwrap();
        }
        let history = lifecycle.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].transition, Transition::Enable);
    }
}
