/*!
 * Simulated camera.
 *
 * Produces synthetic frames whose size follows the binning setting and whose
 * readout completes one exposure time after each trigger.
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use scopeflow_core::types::Value;

use crate::acquisition::{AcquisitionData, Frame};
use crate::device::{Capability, Device, DeviceInfo};
use crate::error::{HardwareError, HwResult};
use crate::hardware::{Hardware, ReadStatus};
use crate::settings::{SettingError, SettingSpec, SettingsRegistry};
use crate::trigger::{SourceKind, TriggerConfig, TriggerEdge, TriggerLine, TriggerMode, TriggerSupport};

use super::{Progress, SimControl, SimFault, TriggerQueue};

/// Default sensor width in pixels
pub const SENSOR_WIDTH: u32 = 64;
/// Default sensor height in pixels
pub const SENSOR_HEIGHT: u32 = 48;

/// Pixel binning modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binning {
    /// No binning
    One,
    /// 2x2 binning
    Two,
    /// 4x4 binning
    Four,
}

impl Binning {
    /// Label used by the `binning` setting
    pub fn as_str(&self) -> &'static str {
        match self {
            Binning::One => "1x1",
            Binning::Two => "2x2",
            Binning::Four => "4x4",
        }
    }

    /// Parse a setting label
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "1x1" => Some(Binning::One),
            "2x2" => Some(Binning::Two),
            "4x4" => Some(Binning::Four),
            _ => None,
        }
    }

    /// Pixels combined along each axis
    pub fn factor(&self) -> u32 {
        match self {
            Binning::One => 1,
            Binning::Two => 2,
            Binning::Four => 4,
        }
    }

    /// Every label, in index order
    pub fn labels() -> [&'static str; 3] {
        ["1x1", "2x2", "4x4"]
    }
}

impl From<Binning> for Value {
    fn from(binning: Binning) -> Self {
        Value::String(binning.as_str().to_string())
    }
}

impl fmt::Display for Binning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated camera backend
#[derive(Debug)]
pub struct SimCamera {
    control: Arc<SimControl>,
    wiring: Vec<TriggerLine>,
    exposure: Duration,
    binning: Binning,
    gain: u16,
    queue: TriggerQueue,
    frames: u64,
}

impl SimCamera {
    /// Create a backend wired to `wiring`
    pub fn new(control: Arc<SimControl>, wiring: Vec<TriggerLine>) -> Self {
        Self {
            control,
            wiring,
            exposure: Duration::from_millis(5),
            binning: Binning::One,
            gain: 1,
            queue: TriggerQueue::default(),
            frames: 0,
        }
    }

    /// Trigger support of a camera wired to `wiring`
    pub fn triggers(wiring: &[TriggerLine]) -> TriggerSupport {
        TriggerSupport::none()
            .with_modes(SourceKind::Software, &[TriggerMode::Once, TriggerMode::Multiple])
            .with_modes(
                SourceKind::Hardware(TriggerEdge::Rising),
                &[TriggerMode::Once, TriggerMode::Multiple, TriggerMode::Start],
            )
            .with_modes(
                SourceKind::Hardware(TriggerEdge::Falling),
                &[TriggerMode::Once, TriggerMode::Multiple],
            )
            .with_lines(wiring.iter().map(TriggerLine::id))
    }

    /// Settings of the camera
    pub fn settings() -> Result<SettingsRegistry, SettingError> {
        let mut settings = SettingsRegistry::new();
        settings.declare_all([
            SettingSpec::float_range("exposure_time", 0.0001, 10.0, 0.005),
            SettingSpec::enumeration("binning", Binning::labels(), "1x1"),
            SettingSpec::int_range("gain", 0, 100, 1),
            SettingSpec::boolean("cooler", false),
            SettingSpec::string("label", Some(32), "camera"),
            SettingSpec::readonly_tuple(
                "sensor_shape",
                vec![
                    Value::Integer(i64::from(SENSOR_WIDTH)),
                    Value::Integer(i64::from(SENSOR_HEIGHT)),
                ],
            ),
        ])?;
        Ok(settings)
    }

    /// Build a simulated camera device
    pub fn build<S: Into<String>>(
        name: S,
        control: Arc<SimControl>,
        wiring: Vec<TriggerLine>,
    ) -> Result<Device<Self>, SettingError> {
        let info = DeviceInfo::new(name, "camera")
            .with_address("sim://camera")
            .with_capability(Capability::DataProducing)
            .with_triggers(Self::triggers(&wiring));
        Ok(Device::new(info, Self::settings()?, Self::new(control, wiring)))
    }

    fn frame(&mut self) -> HwResult<Frame> {
        self.frames += 1;
        let factor = self.binning.factor();
        let (width, height) = (SENSOR_WIDTH / factor, SENSOR_HEIGHT / factor);
        let offset = self.frames as u32;
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x + y + offset) % 256) as u16))
            .map(|p| p.saturating_mul(self.gain))
            .collect();
        Frame::new(width, height, pixels)
            .ok_or_else(|| HardwareError::new("frame buffer size mismatch"))
    }
}

#[async_trait]
impl Hardware for SimCamera {
    async fn initialize(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Initialize, "camera did not answer")?;
        self.queue.clear();
        debug!("Simulated camera ready ({}x{})", SENSOR_WIDTH, SENSOR_HEIGHT);
        Ok(())
    }

    async fn apply_setting(&mut self, name: &str, value: &Value) -> HwResult<()> {
        self.control.check(SimFault::Apply, "camera register write failed")?;
        match name {
            "exposure_time" => {
                let seconds = value
                    .as_float()
                    .ok_or_else(|| HardwareError::new("exposure must be numeric"))?;
                self.exposure = Duration::from_secs_f64(seconds);
            }
            "binning" => {
                self.binning = value
                    .as_str()
                    .and_then(Binning::from_label)
                    .ok_or_else(|| HardwareError::new(format!("bad binning {}", value)))?;
            }
            "gain" => {
                let gain = value
                    .as_integer()
                    .ok_or_else(|| HardwareError::new("gain must be an integer"))?;
                self.gain = u16::try_from(gain).map_err(|e| HardwareError::new(e.to_string()))?;
            }
            "cooler" | "label" => {}
            other => return Err(HardwareError::new(format!("no register for {}", other))),
        }
        Ok(())
    }

    async fn arm(&mut self, config: &TriggerConfig) -> HwResult<()> {
        self.control.check(SimFault::Arm, "camera refused to arm")?;
        self.queue.arm(config, &self.wiring)
    }

    async fn trigger_now(&mut self) -> HwResult<()> {
        self.control.check(SimFault::Trigger, "software trigger lost")?;
        self.queue.fire();
        Ok(())
    }

    async fn read(&mut self) -> HwResult<ReadStatus> {
        self.control.check(SimFault::Read, "sensor readout failed")?;
        match self.queue.poll(self.exposure, self.control.is_stalled()) {
            Progress::Idle => Ok(ReadStatus::Idle),
            Progress::Busy => Ok(ReadStatus::Acquiring),
            Progress::Ready => Ok(ReadStatus::Ready(AcquisitionData::Frame(self.frame()?))),
        }
    }

    async fn abort(&mut self) -> HwResult<()> {
        self.queue.clear();
        Ok(())
    }

    async fn shutdown(&mut self) -> HwResult<()> {
        self.queue.clear();
        debug!("Simulated camera released after {} frames", self.frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Acquire;
    use crate::error::ErrorKind;
    use crate::state::DeviceState;

    async fn camera(wiring: Vec<TriggerLine>) -> (Device<SimCamera>, Arc<SimControl>) {
        let control = SimControl::new();
        let device = SimCamera::build("camera", control.clone(), wiring).unwrap();
        device.initialize().await.unwrap();
        (device, control)
    }

    #[test]
    fn test_binning_labels() {
        for label in Binning::labels() {
            assert_eq!(Binning::from_label(label).unwrap().as_str(), label);
        }
        assert_eq!(Binning::from_label("3x3"), None);
        assert_eq!(Value::from(Binning::Four), Value::from("4x4"));
    }

    #[tokio::test]
    async fn test_binning_changes_frame_size() {
        let (device, _) = camera(vec![]).await;
        device.set_setting("binning", Value::Integer(1)).await.unwrap();
        device.arm(TriggerConfig::software_once()).await.unwrap();
        device.trigger().await.unwrap();

        let acquisition = device.fetch(Duration::from_secs(1)).await.unwrap();
        let frame = acquisition.data.as_frame().unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.pixels.len(), 32 * 24);
    }

    #[tokio::test]
    async fn test_start_mode_clocks_count_frames_from_one_pulse() {
        let line = TriggerLine::new(0);
        let (device, _) = camera(vec![line.clone()]).await;
        device.set_setting("exposure_time", Value::Float(0.001)).await.unwrap();
        device
            .arm(TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Start).with_count(3))
            .await
            .unwrap();

        line.pulse();
        for expected in 1..=3u64 {
            let acquisition = device.fetch(Duration::from_secs(1)).await.unwrap();
            assert_eq!(acquisition.sequence, expected);
        }
        assert_eq!(device.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_apply_failure_is_reported() {
        let (device, control) = camera(vec![]).await;
        control.fail_next(SimFault::Apply);
        let err = device.set_setting("gain", Value::Integer(4)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Hardware(_)));
        assert_eq!(device.get_setting("gain").await.unwrap(), Value::Integer(1));
    }

    #[tokio::test]
    async fn test_sensor_shape_is_readonly() {
        let (device, _) = camera(vec![]).await;
        let description = device.describe_settings().await.unwrap();
        let shape = description.iter().find(|d| d.name == "sensor_shape").unwrap();
        assert!(shape.readonly);
        assert_eq!(shape.type_tag, "readonly-tuple");
    }
}
