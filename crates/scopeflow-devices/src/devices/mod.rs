/*!
 * Simulated instruments for ScopeFlow.
 *
 * The simulators behave like their physical counterparts closely enough to
 * exercise triggering, timing and failure handling without hardware. Each one
 * listens on the trigger lines it is wired to and accepts injected faults
 * through a shared `SimControl`.
 */
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::{HardwareError, HwResult};
use crate::trigger::{Pulse, TriggerConfig, TriggerLine, TriggerMode};

pub mod camera;
pub mod filter_wheel;
pub mod laser;
pub mod stage;

pub use camera::{Binning, SimCamera};
pub use filter_wheel::SimFilterWheel;
pub use laser::SimLaser;
pub use stage::SimStage;

/// Hardware call that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFault {
    /// Handshake
    Initialize,
    /// Setting write
    Apply,
    /// Arming
    Arm,
    /// Software trigger
    Trigger,
    /// Data readout
    Read,
    /// Position query
    Position,
}

/// Fault injection shared between a test and a simulated instrument
#[derive(Debug, Default)]
pub struct SimControl {
    faults: Mutex<HashSet<SimFault>>,
    stalled: AtomicBool,
}

impl SimControl {
    /// Create a control handle with no faults armed
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next call of this kind fail
    pub fn fail_next(&self, fault: SimFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(fault);
        }
    }

    /// Clear every pending fault
    pub fn clear(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// While stalled, triggered acquisitions never complete
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Whether acquisitions are stalled
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, fault: SimFault, message: &str) -> HwResult<()> {
        let armed = self
            .faults
            .lock()
            .map(|mut faults| faults.remove(&fault))
            .unwrap_or(false);
        if armed {
            Err(HardwareError::new(message))
        } else {
            Ok(())
        }
    }
}

/// Progress of the oldest pending trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Idle,
    Busy,
    Ready,
}

/// Triggers received by an armed simulator and not yet turned into data
#[derive(Debug, Default)]
pub(crate) struct TriggerQueue {
    config: Option<TriggerConfig>,
    pulses: Option<Receiver<Pulse>>,
    fired: VecDeque<Instant>,
    clock_start: Option<Instant>,
    clocked: u32,
}

impl TriggerQueue {
    pub(crate) fn arm(&mut self, config: &TriggerConfig, wiring: &[TriggerLine]) -> HwResult<()> {
        self.clear();
        if let Some(id) = config.source.line() {
            let line = wiring
                .iter()
                .find(|line| line.id() == id)
                .ok_or_else(|| HardwareError::new(format!("no cable on trigger input {}", id)))?;
            self.pulses = Some(line.subscribe());
        }
        self.config = Some(*config);
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.config.is_some()
    }

    /// Number of the trigger that will be delivered next, starting at 0
    pub(crate) fn delivered(&self) -> u32 {
        self.clocked
    }

    pub(crate) fn fire(&mut self) {
        if !self.is_armed() {
            warn!("Trigger ignored while disarmed");
            return;
        }
        self.record(Instant::now());
    }

    fn record(&mut self, at: Instant) {
        let start_mode = matches!(
            self.config.map(|c| c.mode),
            Some(TriggerMode::Start)
        );
        if start_mode {
            // only the first edge starts the internal clock
            if self.clock_start.is_none() {
                self.clock_start = Some(at);
            }
        } else {
            self.fired.push_back(at);
        }
    }

    fn drain_pulses(&mut self) {
        let Some(receiver) = self.pulses.as_mut() else {
            return;
        };

        let mut received = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(pulse) => {
                    trace!("Pulse {} on line {}", pulse.seq, pulse.line);
                    received.push(Instant::now());
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Missed {} pulses", missed);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    self.pulses = None;
                    break;
                }
            }
        }
        for at in received {
            self.record(at);
        }
    }

    /// Advance the oldest pending trigger given the time one acquisition takes
    pub(crate) fn poll(&mut self, period: Duration, stalled: bool) -> Progress {
        self.drain_pulses();
        let now = Instant::now();

        if let Some(start) = self.clock_start {
            let due = start + period * (self.clocked + 1);
            if stalled || now < due {
                return Progress::Busy;
            }
            self.clocked += 1;
            return Progress::Ready;
        }

        match self.fired.front() {
            None => Progress::Idle,
            Some(&at) if !stalled && now >= at + period => {
                self.fired.pop_front();
                self.clocked += 1;
                Progress::Ready
            }
            Some(_) => Progress::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerEdge;

    #[test]
    fn test_faults_are_one_shot() {
        let control = SimControl::new();
        control.fail_next(SimFault::Arm);
        assert!(control.check(SimFault::Read, "read").is_ok());
        assert_eq!(
            control.check(SimFault::Arm, "arm failed"),
            Err(HardwareError::new("arm failed"))
        );
        assert!(control.check(SimFault::Arm, "arm failed").is_ok());
    }

    #[tokio::test]
    async fn test_queue_software_triggers() {
        let mut queue = TriggerQueue::default();
        queue.arm(&TriggerConfig::software(TriggerMode::Multiple), &[]).unwrap();
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Idle);

        queue.fire();
        queue.fire();
        assert_eq!(queue.poll(Duration::ZERO, true), Progress::Busy);
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Ready);
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Ready);
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Idle);
        assert_eq!(queue.delivered(), 2);
    }

    #[tokio::test]
    async fn test_queue_requires_wired_line() {
        let mut queue = TriggerQueue::default();
        let config = TriggerConfig::hardware(1, TriggerEdge::Rising, TriggerMode::Once);
        assert!(queue.arm(&config, &[TriggerLine::new(0)]).is_err());
        assert!(!queue.is_armed());
    }

    #[tokio::test]
    async fn test_start_mode_consumes_first_pulse_only() {
        let line = TriggerLine::new(0);
        let mut queue = TriggerQueue::default();
        let config =
            TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Start).with_count(3);
        queue.arm(&config, &[line.clone()]).unwrap();

        line.pulse();
        line.pulse();
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Ready);
        assert_eq!(queue.poll(Duration::ZERO, false), Progress::Ready);
        assert_eq!(queue.fired.len(), 0);
    }
}
