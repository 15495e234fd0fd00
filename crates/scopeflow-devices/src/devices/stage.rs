/*!
 * Simulated two-axis stage.
 *
 * Each trigger moves the stage to the next point of a line scan: the first
 * trigger goes to the target, later ones add one step per axis. A move takes
 * distance / velocity; the reached position is the acquisition payload.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use scopeflow_core::types::Value;

use crate::acquisition::{AcquisitionData, Position};
use crate::device::{Capability, Device, DeviceInfo};
use crate::error::{HardwareError, HwResult};
use crate::hardware::{Hardware, ReadStatus};
use crate::settings::{SettingError, SettingSpec, SettingsRegistry};
use crate::trigger::{SourceKind, TriggerConfig, TriggerEdge, TriggerLine, TriggerMode, TriggerSupport};

use super::{Progress, SimControl, SimFault, TriggerQueue};

/// Travel limit on each axis, in micrometres
pub const TRAVEL_LIMIT_UM: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Xy {
    x: f64,
    y: f64,
}

impl Xy {
    fn distance(&self, other: &Xy) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn position(&self) -> Position {
        Position::from_axes([("x", self.x), ("y", self.y)])
    }
}

/// Simulated stage backend
#[derive(Debug)]
pub struct SimStage {
    control: Arc<SimControl>,
    wiring: Vec<TriggerLine>,
    current: Xy,
    target: Xy,
    step: Xy,
    velocity_um_s: f64,
    queue: TriggerQueue,
}

impl SimStage {
    /// Create a backend wired to `wiring`
    pub fn new(control: Arc<SimControl>, wiring: Vec<TriggerLine>) -> Self {
        Self {
            control,
            wiring,
            current: Xy::default(),
            target: Xy::default(),
            step: Xy::default(),
            velocity_um_s: 20_000.0,
            queue: TriggerQueue::default(),
        }
    }

    /// Trigger support of a stage wired to `wiring`
    pub fn triggers(wiring: &[TriggerLine]) -> TriggerSupport {
        TriggerSupport::none()
            .with_modes(SourceKind::Software, &[TriggerMode::Once, TriggerMode::Multiple])
            .with_modes(
                SourceKind::Hardware(TriggerEdge::Rising),
                &[TriggerMode::Once, TriggerMode::Multiple],
            )
            .with_lines(wiring.iter().map(TriggerLine::id))
    }

    /// Settings of the stage
    pub fn settings() -> Result<SettingsRegistry, SettingError> {
        let mut settings = SettingsRegistry::new();
        settings.declare_all([
            SettingSpec::float_range("x", -TRAVEL_LIMIT_UM, TRAVEL_LIMIT_UM, 0.0),
            SettingSpec::float_range("y", -TRAVEL_LIMIT_UM, TRAVEL_LIMIT_UM, 0.0),
            SettingSpec::float_range("step_x", -1_000.0, 1_000.0, 0.0),
            SettingSpec::float_range("step_y", -1_000.0, 1_000.0, 0.0),
            SettingSpec::float_range("velocity", 1.0, 100_000.0, 20_000.0),
        ])?;
        Ok(settings)
    }

    /// Build a simulated stage device
    pub fn build<S: Into<String>>(
        name: S,
        control: Arc<SimControl>,
        wiring: Vec<TriggerLine>,
    ) -> Result<Device<Self>, SettingError> {
        let info = DeviceInfo::new(name, "stage")
            .with_address("sim://stage")
            .with_capability(Capability::Positionable)
            .with_triggers(Self::triggers(&wiring));
        Ok(Device::new(info, Self::settings()?, Self::new(control, wiring)))
    }

    fn next_point(&self) -> Xy {
        let k = f64::from(self.queue.delivered());
        Xy {
            x: self.target.x + k * self.step.x,
            y: self.target.y + k * self.step.y,
        }
    }

    fn within_travel(point: &Xy) -> bool {
        point.x.abs() <= TRAVEL_LIMIT_UM && point.y.abs() <= TRAVEL_LIMIT_UM
    }
}

#[async_trait]
impl Hardware for SimStage {
    async fn initialize(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Initialize, "stage controller not found")?;
        self.queue.clear();
        self.current = Xy::default();
        debug!("Simulated stage homed");
        Ok(())
    }

    async fn apply_setting(&mut self, name: &str, value: &Value) -> HwResult<()> {
        self.control.check(SimFault::Apply, "stage rejected parameter")?;
        let v = value
            .as_float()
            .ok_or_else(|| HardwareError::new(format!("{} must be numeric", name)))?;
        match name {
            "x" => self.target.x = v,
            "y" => self.target.y = v,
            "step_x" => self.step.x = v,
            "step_y" => self.step.y = v,
            "velocity" => self.velocity_um_s = v,
            other => return Err(HardwareError::new(format!("unknown axis parameter {}", other))),
        }
        Ok(())
    }

    async fn arm(&mut self, config: &TriggerConfig) -> HwResult<()> {
        self.control.check(SimFault::Arm, "stage refused to arm")?;
        self.queue.arm(config, &self.wiring)
    }

    async fn trigger_now(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Trigger, "move command lost")?;
        self.queue.fire();
        Ok(())
    }

    async fn read(&mut self) -> HwResult<ReadStatus> {
        self.control.check(SimFault::Read, "encoder read failed")?;
        let next = self.next_point();
        let travel = Duration::from_secs_f64(self.current.distance(&next) / self.velocity_um_s);
        let progress = self.queue.poll(travel, self.control.is_stalled());

        if progress != Progress::Idle && !Self::within_travel(&next) {
            self.queue.clear();
            return Err(HardwareError::new(format!(
                "move to ({}, {}) exceeds travel",
                next.x, next.y
            )));
        }

        match progress {
            Progress::Idle => Ok(ReadStatus::Idle),
            Progress::Busy => Ok(ReadStatus::Acquiring),
            Progress::Ready => {
                self.current = next;
                Ok(ReadStatus::Ready(AcquisitionData::Position(next.position())))
            }
        }
    }

    async fn position(&mut self) -> HwResult<Option<Position>> {
        self.control.check(SimFault::Position, "encoder read failed")?;
        Ok(Some(self.current.position()))
    }

    async fn abort(&mut self) -> HwResult<()> {
        self.queue.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Acquire;
    use crate::state::DeviceState;

    async fn stage() -> (Device<SimStage>, Arc<SimControl>) {
        let control = SimControl::new();
        let device = SimStage::build("stage", control.clone(), vec![]).unwrap();
        device.initialize().await.unwrap();
        (device, control)
    }

    #[tokio::test]
    async fn test_line_scan() {
        let (device, _) = stage().await;
        device
            .update_settings(vec![
                ("x".to_string(), Value::Float(100.0)),
                ("step_x".to_string(), Value::Float(10.0)),
            ])
            .await
            .unwrap();
        device
            .arm(TriggerConfig::software(TriggerMode::Multiple).with_count(3))
            .await
            .unwrap();

        let mut xs = Vec::new();
        for _ in 0..3 {
            device.trigger().await.unwrap();
            let acquisition = device.fetch(Duration::from_secs(1)).await.unwrap();
            match acquisition.data {
                AcquisitionData::Position(p) => xs.push(p.axis("x").unwrap()),
                other => panic!("unexpected payload {:?}", other),
            }
        }
        assert_eq!(xs, vec![100.0, 110.0, 120.0]);
        assert_eq!(device.position().await.unwrap().axis("x"), Some(120.0));
        assert_eq!(device.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_position_failure_does_not_fault() {
        let (device, control) = stage().await;
        control.fail_next(SimFault::Position);
        assert!(device.position().await.is_err());
        assert_eq!(device.state().await.unwrap(), DeviceState::Enabled);
        assert_eq!(device.position().await.unwrap().axis("y"), Some(0.0));
    }

    #[tokio::test]
    async fn test_move_beyond_travel_faults() {
        let (device, _) = stage().await;
        device
            .update_settings(vec![
                ("x".to_string(), Value::Float(4_995.0)),
                ("step_x".to_string(), Value::Float(10.0)),
            ])
            .await
            .unwrap();
        device
            .arm(TriggerConfig::software(TriggerMode::Multiple))
            .await
            .unwrap();

        device.trigger().await.unwrap();
        device.fetch(Duration::from_secs(1)).await.unwrap();
        device.trigger().await.unwrap();
        assert!(device.fetch(Duration::from_secs(1)).await.is_err());
        assert_eq!(device.state().await.unwrap(), DeviceState::Fault);
    }
}
