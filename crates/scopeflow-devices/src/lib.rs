/*!
 * ScopeFlow Devices
 *
 * This crate provides the uniform device model for microscope components:
 * settings with validation, the lifecycle state machine, trigger
 * configurations, the acquisition contract, and remote access to devices.
 */

#![warn(missing_docs)]

// Re-export core types
pub use scopeflow_core::prelude;

pub mod acquisition;
pub mod device;
pub mod error;
pub mod hardware;
pub mod registry;
pub mod remote;
pub mod settings;
pub mod state;
pub mod trigger;

#[cfg(feature = "simulated")]
pub mod devices;

// Re-export the device contract and its vocabulary
pub use acquisition::{Acquisition, AcquisitionData, Frame, Position};
pub use device::{Acquire, Capability, Device, DeviceEvent, DeviceInfo, DeviceOptions, SharedDevice};
pub use error::{DeviceError, ErrorKind, HardwareError, Operation};
pub use hardware::{Hardware, ReadStatus};
pub use registry::{DeviceRegistry, RegistryError, SharedDeviceRegistry};
pub use remote::{ChannelTransport, DeviceServer, RemoteDevice, Transport};
pub use settings::{SettingDescription, SettingSpec, SettingsRegistry};
pub use state::DeviceState;
pub use trigger::{TriggerConfig, TriggerEdge, TriggerLine, TriggerMode, TriggerSource, TriggerSupport};

/// ScopeFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), scopeflow_core::error::Error> {
    tracing::info!("ScopeFlow Devices {} initialized", VERSION);
    Ok(())
}

/// Names of the simulated device families compiled into this build
pub fn simulated_families() -> Vec<&'static str> {
    #[allow(unused_mut)]
    let mut families = Vec::new();

    #[cfg(feature = "simulated")]
    families.extend(["camera", "stage", "filter_wheel", "laser"]);

    families
}
