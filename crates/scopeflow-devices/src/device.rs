/*!
 * Device abstraction and acquisition contract.
 *
 * `Device<H>` wraps a hardware backend with the lifecycle state machine, the
 * settings registry and the active trigger configuration, all guarded by one
 * async mutex. The object-safe `Acquire` trait is the contract clients program
 * against; it is implemented by local devices and by remote proxies alike.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use scopeflow_core::config::AcquisitionConfig;
use scopeflow_core::event::{EventReceiver, SharedEventBus};
use scopeflow_core::logging::operation_span;
use scopeflow_core::types::Value;
use scopeflow_core::utils::duration_to_millis;

use crate::acquisition::{Acquisition, AcquisitionData, Position};
use crate::error::{DeviceError, ErrorKind, HardwareError, HwResult, Operation, Result};
use crate::hardware::{Hardware, ReadStatus};
use crate::settings::{SettingDescription, SettingsRegistry};
use crate::state::{DeviceState, Lifecycle, Transition, TransitionRecord, DEFAULT_HISTORY_CAPACITY};
use crate::trigger::{self, TriggerConfig, TriggerMode, TriggerSupport};

/// What a device can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Produces data on fetch (cameras, detectors)
    DataProducing,
    /// Accepts trigger configurations
    Triggerable,
    /// Has a continuous position (stages)
    Positionable,
    /// Has discrete positions or an on/off output (filter wheels, lasers)
    Switchable,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::DataProducing => f.write_str("data-producing"),
            Capability::Triggerable => f.write_str("triggerable"),
            Capability::Positionable => f.write_str("positionable"),
            Capability::Switchable => f.write_str("switchable"),
        }
    }
}

/// Static description of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Unique device name
    pub name: String,
    /// Device family (camera, stage, ...)
    pub kind: String,
    /// Optional hardware address
    pub address: Option<String>,
    /// Capability set
    pub capabilities: BTreeSet<Capability>,
    /// Supported trigger configurations and wired lines
    pub triggers: TriggerSupport,
}

impl DeviceInfo {
    /// Create device info without capabilities
    pub fn new<N: Into<String>, K: Into<String>>(name: N, kind: K) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            address: None,
            capabilities: BTreeSet::new(),
            triggers: TriggerSupport::none(),
        }
    }

    /// Set the hardware address
    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Add a capability
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Declare trigger support; a non-empty support set makes the device triggerable
    pub fn with_triggers(mut self, triggers: TriggerSupport) -> Self {
        if triggers.is_triggerable() {
            self.capabilities.insert(Capability::Triggerable);
        }
        self.triggers = triggers;
        self
    }

    /// Whether the device has a capability
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Outcome of one entry of a batch settings update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingOutcome {
    /// Setting name
    pub name: String,
    /// Committed value read back from the registry, or why it was not committed
    pub result: std::result::Result<Value, ErrorKind>,
}

/// Device event published on the device's event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The lifecycle state changed
    StateChanged {
        /// Device name
        device: String,
        /// Previous state
        from: DeviceState,
        /// New state
        to: DeviceState,
        /// Transition taken
        transition: Transition,
    },
    /// A setting value was committed
    SettingChanged {
        /// Device name
        device: String,
        /// Setting name
        setting: String,
        /// Previous value
        previous: Value,
        /// New value
        value: Value,
    },
    /// The device entered the fault state
    Fault {
        /// Device name
        device: String,
        /// Operation that failed
        operation: Operation,
        /// Hardware message
        message: String,
    },
    /// An acquisition was handed to a caller
    DataAcquired {
        /// Device name
        device: String,
        /// Sequence number of the acquisition
        sequence: u64,
    },
}

/// Contract shared by local devices and remote proxies
#[async_trait]
pub trait Acquire: Send + Sync + fmt::Debug {
    /// Static device description
    fn info(&self) -> &DeviceInfo;

    /// Device name
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Whether the device has a capability
    fn has_capability(&self, capability: Capability) -> bool {
        self.info().has_capability(capability)
    }

    /// Current lifecycle state
    async fn state(&self) -> Result<DeviceState>;

    /// Perform the hardware handshake (Uninitialized → Enabled)
    async fn initialize(&self) -> Result<()>;

    /// Leave the disabled state; a no-op when already enabled
    async fn enable(&self) -> Result<()>;

    /// Enter the disabled state; a no-op when already disabled
    async fn disable(&self) -> Result<()>;

    /// Describe every setting in declaration order
    async fn describe_settings(&self) -> Result<Vec<SettingDescription>>;

    /// Current value of one setting
    async fn get_setting(&self, name: &str) -> Result<Value>;

    /// All settings in declaration order
    async fn get_all_settings(&self) -> Result<Vec<(String, Value)>>;

    /// Validate, apply to hardware and commit one setting, returning the committed value
    async fn set_setting(&self, name: &str, value: Value) -> Result<Value>;

    /// Apply several settings in order, reporting each outcome
    async fn update_settings(&self, values: Vec<(String, Value)>) -> Result<Vec<SettingOutcome>>;

    /// Trigger configuration of the pending acquisition, if armed
    async fn trigger_config(&self) -> Result<Option<TriggerConfig>>;

    /// Prepare for triggered acquisition (Enabled → Armed)
    async fn arm(&self, config: TriggerConfig) -> Result<()>;

    /// Leave the armed state without acquiring (Armed → Enabled)
    async fn disarm(&self) -> Result<()>;

    /// Fire a software trigger, or confirm readiness for a hardware pulse
    async fn trigger(&self) -> Result<()>;

    /// Wait up to `timeout` for the data of one trigger
    async fn fetch(&self, timeout: Duration) -> Result<Acquisition>;

    /// Cancel any pending acquisition and return to Enabled
    async fn abort(&self) -> Result<()>;

    /// Re-initialize the hardware from any state, including Fault
    async fn reset(&self) -> Result<()>;

    /// Release the hardware from any state (→ Uninitialized)
    async fn shutdown(&self) -> Result<()>;

    /// Current position of a positionable or switchable device
    async fn position(&self) -> Result<Position>;
}

/// Device reference shared between callers
pub type SharedDevice = Arc<dyn Acquire>;

/// Timing options of a local device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// Interval between hardware polls while fetching
    pub poll_interval: Duration,
    /// Longest `abort` waits for an in-flight hardware call to release the device
    pub abort_grace: Duration,
    /// Number of lifecycle transitions kept for inspection
    pub history_capacity: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::from(&AcquisitionConfig::default())
    }
}

impl From<&AcquisitionConfig> for DeviceOptions {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            abort_grace: config.abort_grace(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct ActiveTrigger {
    config: TriggerConfig,
    delivered: u32,
}

impl ActiveTrigger {
    fn exhausted(&self) -> bool {
        self.config
            .frames_expected()
            .map_or(false, |expected| self.delivered >= expected)
    }
}

#[derive(Debug)]
struct Inner<H> {
    hardware: H,
    lifecycle: Lifecycle,
    settings: SettingsRegistry,
    trigger: Option<ActiveTrigger>,
    sequence: u64,
}

impl<H: Hardware> Inner<H> {
    async fn push_settings(&mut self) -> HwResult<()> {
        for (name, value) in self.settings.writable() {
            self.hardware.apply_setting(&name, &value).await?;
        }
        Ok(())
    }
}

/// A local device: one hardware backend behind the device lock
#[derive(Debug)]
pub struct Device<H: Hardware> {
    info: DeviceInfo,
    options: DeviceOptions,
    inner: Mutex<Inner<H>>,
    abort_epoch: watch::Sender<u64>,
    events: SharedEventBus,
}

impl<H: Hardware> Device<H> {
    /// Create a device with default options
    pub fn new(info: DeviceInfo, settings: SettingsRegistry, hardware: H) -> Self {
        Self::with_options(info, settings, hardware, DeviceOptions::default())
    }

    /// Create a device with explicit options
    pub fn with_options(
        info: DeviceInfo,
        settings: SettingsRegistry,
        hardware: H,
        options: DeviceOptions,
    ) -> Self {
        let (abort_epoch, _) = watch::channel(0);
        let lifecycle = Lifecycle::with_capacity(options.history_capacity);
        Self {
            info,
            options,
            inner: Mutex::new(Inner {
                hardware,
                lifecycle,
                settings,
                trigger: None,
                sequence: 0,
            }),
            abort_epoch,
            events: SharedEventBus::new(),
        }
    }

    /// Publish events on a shared bus instead of a private one
    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    /// Wrap the device for sharing
    pub fn into_shared(self) -> SharedDevice {
        Arc::new(self)
    }

    /// Subscribe to device events
    pub fn subscribe(&self) -> scopeflow_core::error::Result<EventReceiver<DeviceEvent>> {
        self.events.subscribe::<DeviceEvent>()
    }

    /// Timing options
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Lifecycle transitions taken so far, oldest first
    pub async fn history(&self) -> Vec<TransitionRecord> {
        self.inner.lock().await.lifecycle.history()
    }

    fn error(&self, operation: Operation, kind: ErrorKind) -> DeviceError {
        DeviceError::new(&self.info.name, operation, kind)
    }

    fn publish(&self, event: DeviceEvent) {
        if let Err(e) = self.events.publish(event) {
            warn!(device = %self.info.name, "Failed to publish device event: {}", e);
        }
    }

    fn transition(
        &self,
        inner: &mut Inner<H>,
        operation: Operation,
        transition: Transition,
    ) -> Result<DeviceState> {
        let from = inner.lifecycle.state();
        let to = inner
            .lifecycle
            .apply(transition)
            .map_err(|e| self.error(operation, ErrorKind::InvalidState { state: e.from }))?;

        if from != to {
            debug!(device = %self.info.name, "{} -> {}", from, to);
            self.publish(DeviceEvent::StateChanged {
                device: self.info.name.clone(),
                from,
                to,
                transition,
            });
        }
        Ok(to)
    }

    fn fail(&self, inner: &mut Inner<H>, operation: Operation, err: HardwareError) -> DeviceError {
        error!(device = %self.info.name, %operation, "Hardware failure: {}", err);
        inner.trigger = None;
        if let Err(e) = self.transition(inner, operation, Transition::Fail) {
            warn!(device = %self.info.name, "Could not enter fault state: {}", e);
        }
        self.publish(DeviceEvent::Fault {
            device: self.info.name.clone(),
            operation,
            message: err.0.clone(),
        });
        DeviceError::hardware(&self.info.name, operation, err)
    }

    fn require_configurable(&self, inner: &Inner<H>, operation: Operation) -> Result<()> {
        match inner.lifecycle.state() {
            DeviceState::Uninitialized | DeviceState::Disabled | DeviceState::Enabled => Ok(()),
            state => Err(self.error(operation, ErrorKind::InvalidState { state })),
        }
    }

    async fn apply_setting(
        &self,
        inner: &mut Inner<H>,
        name: &str,
        value: &Value,
    ) -> std::result::Result<Value, ErrorKind> {
        let change = inner.settings.prepare(name, value)?;

        // Before the handshake the value is only recorded; initialize pushes it.
        if inner.lifecycle.state() != DeviceState::Uninitialized {
            let result = inner.hardware.apply_setting(name, change.value()).await;
            if let Err(e) = result {
                warn!(device = %self.info.name, setting = name, "Hardware rejected setting: {}", e);
                return Err(ErrorKind::Hardware(e.0));
            }
        }

        let committed = change.value().clone();
        let previous = inner.settings.commit(change);
        debug!(device = %self.info.name, setting = name, "{} -> {}", previous, committed);
        self.publish(DeviceEvent::SettingChanged {
            device: self.info.name.clone(),
            setting: name.to_string(),
            previous,
            value: committed.clone(),
        });
        Ok(committed)
    }

    fn complete(&self, inner: &mut Inner<H>, data: AcquisitionData) -> Result<Acquisition> {
        let (mode, trigger_index, exhausted) = match inner.trigger.as_mut() {
            Some(active) => {
                active.delivered += 1;
                (active.config.mode, active.delivered, active.exhausted())
            }
            None => {
                let state = inner.lifecycle.state();
                return Err(self.error(Operation::Fetch, ErrorKind::InvalidState { state }));
            }
        };

        inner.sequence += 1;
        if exhausted {
            inner.trigger = None;
            self.transition(inner, Operation::Fetch, Transition::Complete)?;
        } else if mode == TriggerMode::Multiple {
            self.transition(inner, Operation::Fetch, Transition::Rearm)?;
        }
        // start mode stays busy while the device clocks the remaining acquisitions

        self.publish(DeviceEvent::DataAcquired {
            device: self.info.name.clone(),
            sequence: inner.sequence,
        });

        Ok(Acquisition {
            device: self.info.name.clone(),
            sequence: inner.sequence,
            trigger_index,
            timestamp: Utc::now(),
            data,
        })
    }

    async fn poll_until_ready(&self, timeout: Duration) -> Result<Acquisition> {
        let mut abort_rx = self.abort_epoch.subscribe();
        // Too large to represent means no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        let mut first_poll = true;

        loop {
            {
                let mut inner = self.inner.lock().await;
                let state = inner.lifecycle.state();
                if !state.is_acquiring() {
                    // Leaving Armed/Busy after the fetch started means an abort won the lock.
                    let aborted = !first_poll || abort_rx.has_changed().unwrap_or(false);
                    let kind = if aborted {
                        ErrorKind::Aborted
                    } else {
                        ErrorKind::InvalidState { state }
                    };
                    return Err(self.error(Operation::Fetch, kind));
                }
                first_poll = false;

                let status = inner.hardware.read().await;
                match status {
                    Err(e) => return Err(self.fail(&mut inner, Operation::Fetch, e)),
                    Ok(ReadStatus::Idle) => {}
                    Ok(ReadStatus::Acquiring) => {
                        if state == DeviceState::Armed {
                            self.transition(&mut inner, Operation::Fetch, Transition::Trigger)?;
                        }
                    }
                    Ok(ReadStatus::Ready(data)) => {
                        if state == DeviceState::Armed {
                            self.transition(&mut inner, Operation::Fetch, Transition::Trigger)?;
                        }
                        return self.complete(&mut inner, data);
                    }
                }
            }

            let mut wait = self.options.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(device = %self.info.name, "Fetch timed out");
                    return Err(self.error(
                        Operation::Fetch,
                        ErrorKind::Timeout {
                            after_ms: duration_to_millis(timeout),
                        },
                    ));
                }
                wait = wait.min(deadline - now);
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = abort_rx.changed() => {
                    if changed.is_ok() {
                        return Err(self.error(Operation::Fetch, ErrorKind::Aborted));
                    }
                }
            }
        }
    }

    fn signal_abort(&self) {
        self.abort_epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }
}

#[async_trait]
impl<H: Hardware> Acquire for Device<H> {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn state(&self) -> Result<DeviceState> {
        Ok(self.inner.lock().await.lifecycle.state())
    }

    async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        if state != DeviceState::Uninitialized {
            return Err(self.error(Operation::Initialize, ErrorKind::InvalidState { state }));
        }

        let result = inner.hardware.initialize().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Initialize, e));
        }

        let result = inner.push_settings().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Initialize, e));
        }

        self.transition(&mut inner, Operation::Initialize, Transition::Initialize)?;
        info!(device = %self.info.name, kind = %self.info.kind, "Device initialized");
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.lifecycle.state() {
            DeviceState::Enabled => Ok(()),
            DeviceState::Disabled => {
                let result = inner.hardware.enable().await;
                if let Err(e) = result {
                    return Err(self.fail(&mut inner, Operation::Enable, e));
                }
                self.transition(&mut inner, Operation::Enable, Transition::Enable)?;
                Ok(())
            }
            state => Err(self.error(Operation::Enable, ErrorKind::InvalidState { state })),
        }
    }

    async fn disable(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.lifecycle.state() {
            DeviceState::Disabled => Ok(()),
            DeviceState::Enabled => {
                let result = inner.hardware.disable().await;
                if let Err(e) = result {
                    return Err(self.fail(&mut inner, Operation::Disable, e));
                }
                self.transition(&mut inner, Operation::Disable, Transition::Disable)?;
                Ok(())
            }
            state => Err(self.error(Operation::Disable, ErrorKind::InvalidState { state })),
        }
    }

    async fn describe_settings(&self) -> Result<Vec<SettingDescription>> {
        Ok(self.inner.lock().await.settings.describe())
    }

    async fn get_setting(&self, name: &str) -> Result<Value> {
        self.inner
            .lock()
            .await
            .settings
            .get(name)
            .map_err(|e| self.error(Operation::GetSetting, e.into()))
    }

    async fn get_all_settings(&self) -> Result<Vec<(String, Value)>> {
        Ok(self.inner.lock().await.settings.get_all())
    }

    async fn set_setting(&self, name: &str, value: Value) -> Result<Value> {
        let mut inner = self.inner.lock().await;
        self.require_configurable(&inner, Operation::SetSetting)?;
        self.apply_setting(&mut inner, name, &value)
            .await
            .map_err(|kind| self.error(Operation::SetSetting, kind))
    }

    async fn update_settings(&self, values: Vec<(String, Value)>) -> Result<Vec<SettingOutcome>> {
        let mut inner = self.inner.lock().await;
        self.require_configurable(&inner, Operation::UpdateSettings)?;

        let mut outcomes = Vec::with_capacity(values.len());
        for (name, value) in values {
            let unchanged = match (inner.settings.prepare(&name, &value), inner.settings.get(&name)) {
                (Ok(change), Ok(current)) if *change.value() == current => Some(current),
                _ => None,
            };
            let result = match unchanged {
                Some(current) => {
                    debug!(device = %self.info.name, setting = %name, "Unchanged, not written");
                    Ok(current)
                }
                None => self.apply_setting(&mut inner, &name, &value).await,
            };
            outcomes.push(SettingOutcome { name, result });
        }
        Ok(outcomes)
    }

    async fn trigger_config(&self) -> Result<Option<TriggerConfig>> {
        Ok(self.inner.lock().await.trigger.as_ref().map(|t| t.config))
    }

    async fn arm(&self, config: TriggerConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        if state != DeviceState::Enabled {
            return Err(self.error(Operation::Arm, ErrorKind::InvalidState { state }));
        }

        trigger::validate(&self.info.triggers, &config)
            .map_err(|r| self.error(Operation::Arm, ErrorKind::from_rejection(config, r)))?;

        let result = inner.hardware.arm(&config).await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Arm, e));
        }

        inner.trigger = Some(ActiveTrigger {
            config,
            delivered: 0,
        });
        self.transition(&mut inner, Operation::Arm, Transition::Arm)?;
        debug!(device = %self.info.name, "Armed for {}", config);
        Ok(())
    }

    async fn disarm(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        if state != DeviceState::Armed {
            return Err(self.error(Operation::Disarm, ErrorKind::InvalidState { state }));
        }

        let result = inner.hardware.abort().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Disarm, e));
        }

        inner.trigger = None;
        self.transition(&mut inner, Operation::Disarm, Transition::Disarm)?;
        Ok(())
    }

    async fn trigger(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        let source = match (state, inner.trigger.as_ref()) {
            (DeviceState::Armed, Some(active)) => active.config.source,
            _ => return Err(self.error(Operation::Trigger, ErrorKind::InvalidState { state })),
        };

        if let Some(line) = source.line() {
            debug!(device = %self.info.name, "Waiting for pulse on line {}", line);
            return Ok(());
        }

        let result = inner.hardware.trigger_now().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Trigger, e));
        }
        self.transition(&mut inner, Operation::Trigger, Transition::Trigger)?;
        Ok(())
    }

    async fn fetch(&self, timeout: Duration) -> Result<Acquisition> {
        self.poll_until_ready(timeout)
            .instrument(operation_span("fetch", &self.info.name))
            .await
    }

    async fn abort(&self) -> Result<()> {
        self.signal_abort();

        let grace = self.options.abort_grace;
        let mut inner = match tokio::time::timeout(grace, self.inner.lock()).await {
            Ok(inner) => inner,
            Err(_) => {
                warn!(device = %self.info.name, "Device still busy after {:?}", grace);
                return Err(self.error(
                    Operation::Abort,
                    ErrorKind::Timeout {
                        after_ms: duration_to_millis(grace),
                    },
                ));
            }
        };
        if !inner.lifecycle.state().is_acquiring() {
            debug!(device = %self.info.name, "Nothing to abort");
            return Ok(());
        }

        let result = inner.hardware.abort().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Abort, e));
        }

        inner.trigger = None;
        self.transition(&mut inner, Operation::Abort, Transition::Abort)?;
        info!(device = %self.info.name, "Acquisition aborted");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.signal_abort();

        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        info!(device = %self.info.name, "Resetting from {}", state);

        if state.is_acquiring() {
            if let Err(e) = inner.hardware.abort().await {
                warn!(device = %self.info.name, "Abort during reset failed: {}", e);
            }
        }
        if state != DeviceState::Uninitialized {
            if let Err(e) = inner.hardware.shutdown().await {
                warn!(device = %self.info.name, "Shutdown during reset failed: {}", e);
            }
        }
        inner.trigger = None;

        let result = inner.hardware.initialize().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Reset, e));
        }
        let result = inner.push_settings().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Reset, e));
        }

        self.transition(&mut inner, Operation::Reset, Transition::Reset)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.signal_abort();

        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        if state == DeviceState::Uninitialized {
            return Ok(());
        }

        if state.is_acquiring() {
            if let Err(e) = inner.hardware.abort().await {
                warn!(device = %self.info.name, "Abort during shutdown failed: {}", e);
            }
        }

        let result = inner.hardware.shutdown().await;
        if let Err(e) = result {
            return Err(self.fail(&mut inner, Operation::Shutdown, e));
        }

        inner.trigger = None;
        self.transition(&mut inner, Operation::Shutdown, Transition::Shutdown)?;
        info!(device = %self.info.name, "Device shut down");
        Ok(())
    }

    async fn position(&self) -> Result<Position> {
        if !self.info.has_capability(Capability::Positionable)
            && !self.info.has_capability(Capability::Switchable)
        {
            return Err(self.error(
                Operation::Position,
                ErrorKind::Unsupported(Capability::Positionable),
            ));
        }

        let mut inner = self.inner.lock().await;
        let state = inner.lifecycle.state();
        if matches!(state, DeviceState::Uninitialized | DeviceState::Fault) {
            return Err(self.error(Operation::Position, ErrorKind::InvalidState { state }));
        }

        // Read-only query: a failure is reported but does not fault the device.
        match inner.hardware.position().await {
            Ok(Some(position)) => Ok(position),
            Ok(None) => Err(self.error(
                Operation::Position,
                ErrorKind::Unsupported(Capability::Positionable),
            )),
            Err(e) => Err(DeviceError::hardware(&self.info.name, Operation::Position, e)),
        }
    }
}
