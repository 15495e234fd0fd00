/*!
 * Simulated filter wheel.
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

/// Simulated filter wheel backend
///
/// The first trigger turns the wheel to the `position` slot; each further
/// trigger advances it by `step` slots.
#[derive(Debug)]
pub struct SimFilterWheel {
    control: Arc<SimControl>,
    wiring: Vec<TriggerLine>,
    slots: u32,
    current: u32,
    target: u32,
    step: u32,
    switch_time: Duration,
    queue: TriggerQueue,
}

impl SimFilterWheel {
    /// Create a backend with `slots` positions
    pub fn new(control: Arc<SimControl>, wiring: Vec<TriggerLine>, slots: u32) -> Self {
        Self {
            control,
            wiring,
            slots: slots.max(1),
            current: 0,
            target: 0,
            step: 1,
            switch_time: Duration::from_millis(10),
            queue: TriggerQueue::default(),
        }
    }

    /// Trigger support of a wheel wired to `wiring`
    pub fn triggers(wiring: &[TriggerLine]) -> TriggerSupport {
        let modes = [TriggerMode::Once, TriggerMode::Multiple];
        TriggerSupport::none()
            .with_modes(SourceKind::Software, &modes)
            .with_modes(SourceKind::Hardware(TriggerEdge::Rising), &modes)
            .with_modes(SourceKind::Hardware(TriggerEdge::Falling), &modes)
            .with_lines(wiring.iter().map(TriggerLine::id))
    }

    /// Settings of a wheel with `slots` positions
    pub fn settings(slots: u32) -> Result<SettingsRegistry, SettingError> {
        let last = i64::from(slots.max(1)) - 1;
        let mut settings = SettingsRegistry::new();
        settings.declare_all([
            SettingSpec::int_range("position", 0, last, 0),
            SettingSpec::int_range("step", 0, last, last.min(1)),
            SettingSpec::int_range("switch_time_ms", 1, 1_000, 10),
            SettingSpec::int_range("slots", 1, 64, i64::from(slots.max(1))).readonly(),
        ])?;
        Ok(settings)
    }

    /// Build a simulated filter wheel device
    pub fn build<S: Into<String>>(
        name: S,
        control: Arc<SimControl>,
        wiring: Vec<TriggerLine>,
        slots: u32,
    ) -> Result<Device<Self>, SettingError> {
        let info = DeviceInfo::new(name, "filter_wheel")
            .with_address("sim://filter-wheel")
            .with_capability(Capability::Switchable)
            .with_triggers(Self::triggers(&wiring));
        Ok(Device::new(
            info,
            Self::settings(slots)?,
            Self::new(control, wiring, slots),
        ))
    }

    fn next_slot(&self) -> u32 {
        let advanced = u64::from(self.target) + u64::from(self.queue.delivered()) * u64::from(self.step);
        (advanced % u64::from(self.slots)) as u32
    }

    fn slot_setting(name: &str, value: &Value) -> HwResult<u32> {
        value
            .as_integer()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| HardwareError::new(format!("{} must be a non-negative integer", name)))
    }
}

#[async_trait]
impl Hardware for SimFilterWheel {
    async fn initialize(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Initialize, "filter wheel not responding")?;
        self.queue.clear();
        debug!("Simulated filter wheel with {} slots ready", self.slots);
        Ok(())
    }

    async fn apply_setting(&mut self, name: &str, value: &Value) -> HwResult<()> {
        self.control.check(SimFault::Apply, "filter wheel rejected parameter")?;
        match name {
            "position" => self.target = Self::slot_setting(name, value)?,
            "step" => self.step = Self::slot_setting(name, value)?,
            "switch_time_ms" => {
                self.switch_time = Duration::from_millis(u64::from(Self::slot_setting(name, value)?))
            }
            other => return Err(HardwareError::new(format!("unknown parameter {}", other))),
        }
        Ok(())
    }

    async fn arm(&mut self, config: &TriggerConfig) -> HwResult<()> {
        self.control.check(SimFault::Arm, "filter wheel refused to arm")?;
        self.queue.arm(config, &self.wiring)
    }

    async fn trigger_now(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Trigger, "move command lost")?;
        self.queue.fire();
        Ok(())
    }

    async fn read(&mut self) -> HwResult<ReadStatus> {
        self.control.check(SimFault::Read, "filter wheel sensor failed")?;
        let next = self.next_slot();
        match self.queue.poll(self.switch_time, self.control.is_stalled()) {
            Progress::Idle => Ok(ReadStatus::Idle),
            Progress::Busy => Ok(ReadStatus::Acquiring),
            Progress::Ready => {
                self.current = next;
                Ok(ReadStatus::Ready(AcquisitionData::SwitchPosition { position: next }))
            }
        }
    }

    async fn position(&mut self) -> HwResult<Option<Position>> {
        self.control.check(SimFault::Position, "filter wheel sensor failed")?;
        Ok(Some(Position::from_axes([("slot", f64::from(self.current))])))
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

    #[tokio::test]
    async fn test_wheel_advances_and_wraps() {
        let line = TriggerLine::new(2);
        let device = SimFilterWheel::build("wheel", SimControl::new(), vec![line.clone()], 4).unwrap();
        device.initialize().await.unwrap();
        device.set_setting("position", Value::Integer(2)).await.unwrap();
        device.set_setting("switch_time_ms", Value::Integer(1)).await.unwrap();
        device
            .arm(TriggerConfig::hardware(2, TriggerEdge::Falling, TriggerMode::Multiple).with_count(3))
            .await
            .unwrap();

        let mut slots = Vec::new();
        for _ in 0..3 {
            line.pulse();
            match device.fetch(Duration::from_secs(1)).await.unwrap().data {
                AcquisitionData::SwitchPosition { position } => slots.push(position),
                other => panic!("unexpected payload {:?}", other),
            }
        }
        assert_eq!(slots, vec![2, 3, 0]);
        assert_eq!(device.position().await.unwrap().axis("slot"), Some(0.0));
    }

    #[tokio::test]
    async fn test_slot_range_follows_wheel_size() {
        let device = SimFilterWheel::build("wheel", SimControl::new(), vec![], 6).unwrap();
        device.initialize().await.unwrap();
        assert!(device.set_setting("position", Value::Integer(5)).await.is_ok());
        assert!(device.set_setting("position", Value::Integer(6)).await.is_err());
        assert!(device.set_setting("slots", Value::Integer(8)).await.is_err());
    }
}
