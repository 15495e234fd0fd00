/*!
 * Acquisition controller.
 *
 * The controller owns the device registry and a set of named acquisition
 * groups built from registered devices.
 */
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use scopeflow_core::config::AcquisitionConfig;
use scopeflow_devices::registry::SharedDeviceRegistry;
use scopeflow_devices::{DeviceRegistry, RegistryError, SharedDevice, TriggerConfig, TriggerLine};

use crate::error::{GroupError, Result};
use crate::group::GroupBuilder;
use crate::outcome::GroupAcquisition;
use crate::AcquisitionGroup;

/// Coordinates registered devices and the groups built from them
#[derive(Debug)]
pub struct Controller {
    registry: SharedDeviceRegistry,
    config: AcquisitionConfig,
    groups: RwLock<HashMap<String, Arc<AcquisitionGroup>>>,
}

impl Controller {
    /// Create a controller with default acquisition settings
    pub fn new(registry: SharedDeviceRegistry) -> Self {
        Self::with_config(registry, AcquisitionConfig::default())
    }

    /// Create a controller with explicit acquisition settings
    pub fn with_config(registry: SharedDeviceRegistry, config: AcquisitionConfig) -> Self {
        Self {
            registry,
            config,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// The device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Acquisition settings
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Register a device
    pub fn add_device(&self, device: SharedDevice) -> Result<()> {
        Ok(self.registry.register(device)?)
    }

    /// Initialize every registered device
    pub async fn initialize(&self) -> Result<()> {
        Ok(self.registry.initialize_all(&self.config).await?)
    }

    /// Build and store a group from registered device names
    pub async fn create_group<S: AsRef<str>>(
        &self,
        name: &str,
        members: &[S],
        config: TriggerConfig,
        line: Option<TriggerLine>,
    ) -> Result<Arc<AcquisitionGroup>> {
        let mut builder = GroupBuilder::new(name, config);
        for member in members {
            let device = self.registry.get(member.as_ref()).map_err(|e| match e {
                RegistryError::NotFound(name) => GroupError::UnknownDevice(name),
                other => GroupError::Registry(other),
            })?;
            builder = builder.member(device);
        }
        if let Some(line) = line {
            builder = builder.line(line);
        }

        self.insert_group(builder.build()?).await
    }

    /// Store a group built elsewhere
    pub async fn insert_group(&self, group: AcquisitionGroup) -> Result<Arc<AcquisitionGroup>> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(group.name()) {
            return Err(GroupError::AlreadyExists(group.name().to_string()));
        }

        let group = Arc::new(group);
        groups.insert(group.name().to_string(), group.clone());
        info!(
            "Created group {} with members {}",
            group.name(),
            group.members().join(", ")
        );
        Ok(group)
    }

    /// Look up a group
    pub async fn group(&self, name: &str) -> Result<Arc<AcquisitionGroup>> {
        self.groups
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GroupError::NotFound(name.to_string()))
    }

    /// Remove a group; its devices stay registered
    pub async fn remove_group(&self, name: &str) -> Result<Arc<AcquisitionGroup>> {
        let group = self
            .groups
            .write()
            .await
            .remove(name)
            .ok_or_else(|| GroupError::NotFound(name.to_string()))?;
        debug!("Removed group {}", name);
        Ok(group)
    }

    /// Names of all groups, sorted
    pub async fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one synchronized acquisition on a group
    pub async fn run(&self, group: &str, timeout: Option<Duration>) -> Result<GroupAcquisition> {
        let timeout = timeout.unwrap_or_else(|| self.config.fetch_timeout());
        self.group(group).await?.run(timeout).await
    }

    /// Run several synchronized acquisitions on a group
    pub async fn run_cycles(
        &self,
        group: &str,
        cycles: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<GroupAcquisition>> {
        let timeout = timeout.unwrap_or_else(|| self.config.fetch_timeout());
        self.group(group).await?.run_cycles(cycles, timeout).await
    }

    /// Abort pending acquisitions on every registered device
    pub async fn abort_all(&self) -> Result<()> {
        info!("Aborting all devices");
        Ok(self.registry.abort_all().await?)
    }

    /// Shut down every registered device and forget all groups
    pub async fn shutdown(&self) -> Result<()> {
        self.groups.write().await.clear();
        Ok(self.registry.shutdown_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopeflow_devices::devices::{SimCamera, SimControl, SimLaser, SimStage};
    use scopeflow_devices::{Acquire, DeviceState, TriggerEdge, TriggerMode};

    fn controller(line: &TriggerLine) -> Controller {
        let controller = Controller::new(Arc::new(DeviceRegistry::new()));
        let control = SimControl::new();
        let wiring = vec![line.clone()];
        controller
            .add_device(SimCamera::build("camera", control.clone(), wiring.clone()).unwrap().into_shared())
            .unwrap();
        controller
            .add_device(SimStage::build("stage", control.clone(), wiring.clone()).unwrap().into_shared())
            .unwrap();
        controller
            .add_device(SimLaser::build("laser-488", control, wiring, 488, 50.0).unwrap().into_shared())
            .unwrap();
        controller
    }

    #[tokio::test]
    async fn test_groups_resolve_registered_names() {
        let line = TriggerLine::new(0);
        let controller = controller(&line);
        controller.initialize().await.unwrap();

        let config = TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Once);
        controller
            .create_group("imaging", &["camera", "laser-488"], config, Some(line.clone()))
            .await
            .unwrap();

        let err = controller
            .create_group("imaging", &["camera"], config, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::AlreadyExists(_)));

        let err = controller
            .create_group("missing", &["camera", "shutter"], config, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::UnknownDevice(name) if name == "shutter"));

        let record = controller.run("imaging", None).await.unwrap();
        assert_eq!(record.devices(), vec!["camera", "laser-488"]);
        assert_eq!(controller.group_names().await, vec!["imaging"]);
    }

    #[tokio::test]
    async fn test_run_unknown_group() {
        let controller = controller(&TriggerLine::new(0));
        assert!(matches!(
            controller.run("nothing", None).await,
            Err(GroupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_devices() {
        let line = TriggerLine::new(0);
        let controller = controller(&line);
        controller.initialize().await.unwrap();
        controller
            .create_group("all", &["camera", "stage"], TriggerConfig::software_once(), None)
            .await
            .unwrap();

        tokio_test::assert_ok!(controller.abort_all().await);
        tokio_test::assert_ok!(controller.shutdown().await);
        assert!(controller.group_names().await.is_empty());
        let camera = controller.registry().get("camera").unwrap();
        assert_eq!(camera.state().await.unwrap(), DeviceState::Uninitialized);
    }
}
