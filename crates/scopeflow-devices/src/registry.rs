/*!
 * Device registry for ScopeFlow.
 *
 * This module provides a registry of named device references, with bulk
 * initialization, shutdown and abort across everything registered.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use scopeflow_core::config::AcquisitionConfig;
use scopeflow_core::error::Error as CoreError;
use scopeflow_core::types::Id;
use scopeflow_core::utils::{duration_to_millis, with_retry};

use crate::device::{Capability, DeviceInfo, SharedDevice};
use crate::error::{DeviceError, ErrorKind, Operation};
use crate::state::DeviceState;

/// Error type for registry operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A device with this name is already registered
    #[error("device '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No device with this name
    #[error("device '{0}' not found")]
    NotFound(String),

    /// The registry lock was poisoned
    #[error("device registry lock poisoned")]
    Lock,

    /// One or more devices failed
    #[error("{} device(s) failed: {}", .0.len(), summarize(.0))]
    Devices(Vec<DeviceError>),
}

fn summarize(errors: &[DeviceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Event types for device registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was added to the registry
    DeviceAdded(DeviceInfo),
    /// A device was removed from the registry
    DeviceRemoved(String),
}

/// Device registry
#[derive(Debug)]
pub struct DeviceRegistry {
    /// The registered devices, keyed by name
    devices: RwLock<HashMap<Id, SharedDevice>>,
    /// Event sender for registry events
    event_sender: broadcast::Sender<RegistryEvent>,
}

/// A registry shared between controllers
pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    /// Create a new device registry
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            devices: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    /// Register a device under its name
    pub fn register(&self, device: SharedDevice) -> Result<(), RegistryError> {
        let id = Id::from(device.name());
        let info = device.info().clone();

        let mut devices = self.devices.write().map_err(|_| RegistryError::Lock)?;
        if devices.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id.to_string()));
        }

        devices.insert(id.clone(), device);
        let _ = self.event_sender.send(RegistryEvent::DeviceAdded(info));
        debug!("Registered device {}", id);

        Ok(())
    }

    /// Unregister a device, returning it
    pub fn unregister(&self, name: &str) -> Result<SharedDevice, RegistryError> {
        let mut devices = self.devices.write().map_err(|_| RegistryError::Lock)?;
        let device = devices
            .remove(&Id::from(name))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let _ = self
            .event_sender
            .send(RegistryEvent::DeviceRemoved(name.to_string()));
        debug!("Unregistered device {}", name);

        Ok(device)
    }

    /// Get a device by name
    pub fn get(&self, name: &str) -> Result<SharedDevice, RegistryError> {
        let devices = self.devices.read().map_err(|_| RegistryError::Lock)?;
        devices
            .get(&Id::from(name))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Get several devices by name, in the order given
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<SharedDevice>, RegistryError> {
        names.iter().map(|name| self.get(name.as_ref())).collect()
    }

    /// All registered devices, ordered by name
    pub fn devices(&self) -> Result<Vec<SharedDevice>, RegistryError> {
        let devices = self.devices.read().map_err(|_| RegistryError::Lock)?;
        let mut entries: Vec<(&Id, &SharedDevice)> = devices.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Ok(entries.into_iter().map(|(_, d)| d.clone()).collect())
    }

    /// Names of all registered devices, sorted
    pub fn names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .devices()?
            .iter()
            .map(|d| d.name().to_string())
            .collect())
    }

    /// Devices of one family (camera, stage, ...)
    pub fn by_kind(&self, kind: &str) -> Result<Vec<SharedDevice>, RegistryError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.info().kind == kind)
            .collect())
    }

    /// Devices with a capability
    pub fn by_capability(&self, capability: Capability) -> Result<Vec<SharedDevice>, RegistryError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.has_capability(capability))
            .collect())
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Initialize every uninitialized device concurrently, retrying failed handshakes
    pub async fn initialize_all(&self, config: &AcquisitionConfig) -> Result<(), RegistryError> {
        let devices = self.devices()?;
        let total = devices.len();

        let results = join_all(
            devices
                .into_iter()
                .map(|device| initialize_with_retry(device, config.clone())),
        )
        .await;

        let failures: Vec<DeviceError> = results.into_iter().filter_map(Result::err).collect();
        if !failures.is_empty() {
            for failure in &failures {
                error!("{}", failure);
            }
            return Err(RegistryError::Devices(failures));
        }

        info!("Initialized {} devices", total);
        Ok(())
    }

    /// Abort pending acquisitions on every device
    pub async fn abort_all(&self) -> Result<(), RegistryError> {
        let devices = self.devices()?;
        let results = join_all(devices.iter().map(|d| d.abort())).await;
        collect_failures(results)
    }

    /// Shut down every device
    pub async fn shutdown_all(&self) -> Result<(), RegistryError> {
        let devices = self.devices()?;
        let results = join_all(devices.iter().map(|d| d.shutdown())).await;
        let outcome = collect_failures(results);
        info!("Shut down {} devices", devices.len());
        outcome
    }

    /// Current state of every device, ordered by name
    pub async fn states(&self) -> Result<Vec<(String, Result<DeviceState, DeviceError>)>, RegistryError> {
        let devices = self.devices()?;
        let states = join_all(devices.iter().map(|d| d.state())).await;
        Ok(devices
            .iter()
            .map(|d| d.name().to_string())
            .zip(states)
            .collect())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_failures(results: Vec<Result<(), DeviceError>>) -> Result<(), RegistryError> {
    let failures: Vec<DeviceError> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::Devices(failures))
    }
}

async fn initialize_with_retry(
    device: SharedDevice,
    config: AcquisitionConfig,
) -> Result<(), DeviceError> {
    let name = device.name().to_string();
    let state = device.state().await?;
    if !matches!(state, DeviceState::Uninitialized | DeviceState::Fault) {
        debug!("Device {} already initialized", name);
        return Ok(());
    }

    let last_error: Arc<Mutex<Option<DeviceError>>> = Arc::new(Mutex::new(None));
    let result = with_retry(config.initialize_timeout(), config.initialize_retries, || {
        let device = device.clone();
        let last_error = last_error.clone();
        async move {
            // A failed handshake leaves the device faulted; only a reset recovers it.
            let attempt = match device.state().await {
                Ok(DeviceState::Fault) => device.reset().await,
                Ok(_) => device.initialize().await,
                Err(e) => Err(e),
            };
            attempt.map_err(|e| {
                let message = e.to_string();
                if let Ok(mut last) = last_error.lock() {
                    *last = Some(e);
                }
                CoreError::other(message)
            })
        }
    })
    .await;

    result.map_err(|e| {
        let last = last_error.lock().ok().and_then(|mut last| last.take());
        match (e, last) {
            (CoreError::Timeout(_), _) => DeviceError::new(
                &name,
                Operation::Initialize,
                ErrorKind::Timeout {
                    after_ms: duration_to_millis(config.initialize_timeout()),
                },
            ),
            (_, Some(device_error)) => device_error,
            (other, None) => {
                warn!("Initialization of {} failed without a device error", name);
                DeviceError::new(&name, Operation::Initialize, ErrorKind::Hardware(other.to_string()))
            }
        }
    })
}
