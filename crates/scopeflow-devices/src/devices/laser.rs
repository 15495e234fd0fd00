/*!
 * Simulated laser with a TTL-gated emission window.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use scopeflow_core::types::Value;
use scopeflow_core::utils::duration_to_millis;

use crate::acquisition::AcquisitionData;
use crate::device::{Capability, Device, DeviceInfo};
use crate::error::{HardwareError, HwResult};
use crate::hardware::{Hardware, ReadStatus};
use crate::settings::{SettingError, SettingSpec, SettingsRegistry};
use crate::trigger::{SourceKind, TriggerConfig, TriggerEdge, TriggerLine, TriggerMode, TriggerSupport};

use super::{Progress, SimControl, SimFault, TriggerQueue};

/// Simulated laser backend
#[derive(Debug)]
pub struct SimLaser {
    control: Arc<SimControl>,
    wiring: Vec<TriggerLine>,
    wavelength_nm: u32,
    power_mw: f64,
    pulse: Duration,
    emission_enabled: bool,
    queue: TriggerQueue,
}

impl SimLaser {
    /// Create a backend for a laser line
    pub fn new(control: Arc<SimControl>, wiring: Vec<TriggerLine>, wavelength_nm: u32) -> Self {
        Self {
            control,
            wiring,
            wavelength_nm,
            power_mw: 1.0,
            pulse: Duration::from_millis(5),
            emission_enabled: false,
            queue: TriggerQueue::default(),
        }
    }

    /// Trigger support of a laser wired to `wiring`
    pub fn triggers(wiring: &[TriggerLine]) -> TriggerSupport {
        let modes = [TriggerMode::Once, TriggerMode::Multiple];
        TriggerSupport::none()
            .with_modes(SourceKind::Software, &modes)
            .with_modes(SourceKind::Hardware(TriggerEdge::Pulse), &modes)
            .with_modes(SourceKind::Hardware(TriggerEdge::Rising), &modes)
            .with_lines(wiring.iter().map(TriggerLine::id))
    }

    /// Settings of a laser with the given line and maximum power
    pub fn settings(wavelength_nm: u32, max_power_mw: f64) -> Result<SettingsRegistry, SettingError> {
        let mut settings = SettingsRegistry::new();
        settings.declare_all([
            SettingSpec::float_range("power_mw", 0.0, max_power_mw, max_power_mw.min(1.0)),
            SettingSpec::int_range("pulse_ms", 1, 10_000, 5),
            SettingSpec::int_range("wavelength_nm", 300, 1_100, i64::from(wavelength_nm)).readonly(),
        ])?;
        Ok(settings)
    }

    /// Build a simulated laser device
    pub fn build<S: Into<String>>(
        name: S,
        control: Arc<SimControl>,
        wiring: Vec<TriggerLine>,
        wavelength_nm: u32,
        max_power_mw: f64,
    ) -> Result<Device<Self>, SettingError> {
        let info = DeviceInfo::new(name, "laser")
            .with_address(format!("sim://laser/{}", wavelength_nm))
            .with_capability(Capability::Switchable)
            .with_triggers(Self::triggers(&wiring));
        Ok(Device::new(
            info,
            Self::settings(wavelength_nm, max_power_mw)?,
            Self::new(control, wiring, wavelength_nm),
        ))
    }
}

#[async_trait]
impl Hardware for SimLaser {
    async fn initialize(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Initialize, "laser interlock open")?;
        self.queue.clear();
        self.emission_enabled = true;
        debug!("Simulated {} nm laser ready", self.wavelength_nm);
        Ok(())
    }

    async fn enable(&mut self) -> HwResult<()> {
        self.emission_enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> HwResult<()> {
        self.emission_enabled = false;
        Ok(())
    }

    async fn apply_setting(&mut self, name: &str, value: &Value) -> HwResult<()> {
        self.control.check(SimFault::Apply, "laser rejected parameter")?;
        match name {
            "power_mw" => {
                self.power_mw = value
                    .as_float()
                    .ok_or_else(|| HardwareError::new("power must be numeric"))?;
            }
            "pulse_ms" => {
                let ms = value
                    .as_integer()
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or_else(|| HardwareError::new("pulse length must be a positive integer"))?;
                self.pulse = Duration::from_millis(ms);
            }
            other => return Err(HardwareError::new(format!("unknown parameter {}", other))),
        }
        Ok(())
    }

    async fn arm(&mut self, config: &TriggerConfig) -> HwResult<()> {
        self.control.check(SimFault::Arm, "laser refused to arm")?;
        if !self.emission_enabled {
            return Err(HardwareError::new("emission is disabled"));
        }
        self.queue.arm(config, &self.wiring)
    }

    async fn trigger_now(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Trigger, "TTL output stuck")?;
        self.queue.fire();
        Ok(())
    }

    async fn read(&mut self) -> HwResult<ReadStatus> {
        self.control.check(SimFault::Read, "power monitor failed")?;
        match self.queue.poll(self.pulse, self.control.is_stalled()) {
            Progress::Idle => Ok(ReadStatus::Idle),
            Progress::Busy => Ok(ReadStatus::Acquiring),
            Progress::Ready => Ok(ReadStatus::Ready(AcquisitionData::Emission {
                power_mw: self.power_mw,
                duration_ms: duration_to_millis(self.pulse),
            })),
        }
    }

    async fn abort(&mut self) -> HwResult<()> {
        self.queue.clear();
        Ok(())
    }

    async fn shutdown(&mut self) -> HwResult<()> {
        self.queue.clear();
        self.emission_enabled = false;
        info!("Simulated {} nm laser off", self.wavelength_nm);
        Ok(())
    }
}
