/*!
 * Acquisition groups.
 *
 * A group drives several devices through one synchronized acquisition: every
 * member is armed with the same trigger source, one trigger event is fired,
 * and the data of all members is collected against a common deadline. Each
 * member operation runs on its own task; results are joined and reported per
 * member.
 */
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use scopeflow_devices::error::{ErrorKind, Operation};
use scopeflow_devices::{
    Acquire, Acquisition, DeviceError, DeviceState, SharedDevice, TriggerConfig, TriggerLine,
    TriggerMode,
};

use crate::error::{GroupError, Result};
use crate::outcome::{GroupAcquisition, MemberOutcome, MemberStatus};

type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Clone)]
struct Member {
    device: SharedDevice,
    config: TriggerConfig,
}

/// A set of devices acquiring on one shared trigger
#[derive(Debug)]
pub struct AcquisitionGroup {
    name: String,
    config: TriggerConfig,
    members: Vec<Member>,
    line: Option<TriggerLine>,
    collections: AtomicU64,
}

impl AcquisitionGroup {
    /// Start building a group
    pub fn builder<S: Into<String>>(name: S, config: TriggerConfig) -> GroupBuilder {
        GroupBuilder::new(name, config)
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group trigger configuration
    pub fn config(&self) -> TriggerConfig {
        self.config
    }

    /// Shared trigger line, if the group pulses one
    pub fn line(&self) -> Option<&TriggerLine> {
        self.line.as_ref()
    }

    /// Member names, in member order
    pub fn members(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.device.name()).collect()
    }

    /// Trigger configuration of one member
    pub fn member_config(&self, device: &str) -> Option<TriggerConfig> {
        self.members
            .iter()
            .find(|m| m.device.name() == device)
            .map(|m| m.config)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Arm every member concurrently
    ///
    /// If any member rejects, the members that did arm are disarmed again and
    /// `PartialArm` reports every member's outcome.
    pub async fn arm(&self) -> Result<Vec<MemberOutcome>> {
        self.arm_members(&self.all()).await
    }

    /// Fire one trigger event on every member
    ///
    /// Software groups call `trigger()` on all members concurrently. Hardware
    /// groups confirm every member is waiting, then pulse the shared line once.
    pub async fn fire(&self) -> Result<Vec<MemberOutcome>> {
        self.fire_members(&self.all()).await
    }

    /// Fetch one acquisition from every member against a common deadline
    ///
    /// When a member fails or times out, the other members are aborted and
    /// `GroupAcquisition` reports every member's outcome.
    pub async fn collect(&self, timeout: Duration) -> Result<GroupAcquisition> {
        let started_at = Utc::now();
        let cycle = self.collections.fetch_add(1, Ordering::Relaxed);

        let mut pending: FuturesUnordered<_> = self
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let device = member.device.clone();
                let handle = tokio::spawn(async move { device.fetch(timeout).await });
                async move { (index, handle.await) }
            })
            .collect();

        let mut results: Vec<Option<DeviceResult<Acquisition>>> =
            (0..self.members.len()).map(|_| None).collect();
        let mut aborted = false;

        while let Some((index, joined)) = pending.next().await {
            let result =
                joined.unwrap_or_else(|e| Err(self.join_error(index, Operation::Fetch, e)));
            if let Err(e) = &result {
                if !aborted {
                    aborted = true;
                    warn!(group = %self.name, "{}; aborting the other members", e);
                    self.abort_quietly().await;
                }
            }
            results[index] = Some(result);
        }

        if aborted {
            let statuses = results
                .into_iter()
                .map(|result| match result {
                    Some(Ok(acquisition)) => MemberStatus::Acquired {
                        sequence: acquisition.sequence,
                    },
                    Some(Err(e)) if e.is_aborted() => MemberStatus::Aborted,
                    Some(Err(e)) => MemberStatus::Failed(e),
                    None => MemberStatus::NotAttempted,
                })
                .collect();
            return Err(GroupError::GroupAcquisition {
                group: self.name.clone(),
                outcomes: self.outcomes(statuses),
            });
        }

        let acquisitions: Vec<Acquisition> = results.into_iter().flatten().flatten().collect();
        let record = GroupAcquisition {
            group: self.name.clone(),
            run: Uuid::new_v4(),
            cycle,
            started_at,
            finished_at: Utc::now(),
            acquisitions,
        };
        debug!(
            group = %self.name,
            cycle,
            "Collected {} acquisitions in {} ms",
            record.acquisitions.len(),
            record.elapsed().num_milliseconds()
        );
        Ok(record)
    }

    /// Arm, fire and collect once
    pub async fn run(&self, timeout: Duration) -> Result<GroupAcquisition> {
        let span = info_span!("group_run", group = %self.name);
        async {
            self.arm().await?;
            self.fire().await?;
            let record = self.collect(timeout).await?;
            info!(
                "Group run {} finished: {} acquisitions",
                record.run,
                record.acquisitions.len()
            );
            Ok::<_, GroupError>(record)
        }
        .instrument(span)
        .await
    }

    /// Run `cycles` synchronized acquisitions
    ///
    /// Before each cycle, members that have returned to Enabled are armed
    /// again and every member still waiting for a trigger is fired; members
    /// clocking a start-mode sequence are only collected from. Members left
    /// armed at the end are disarmed.
    pub async fn run_cycles(&self, cycles: u32, timeout: Duration) -> Result<Vec<GroupAcquisition>> {
        let span = info_span!("group_cycles", group = %self.name, cycles);
        async {
            let mut records = Vec::with_capacity(cycles as usize);
            for cycle in 0..cycles {
                let states = self.states().await?;
                let to_arm: Vec<usize> = indices_where(&states, |s| {
                    !matches!(s, DeviceState::Armed | DeviceState::Busy)
                });
                let to_fire: Vec<usize> = indices_where(&states, |s| s != DeviceState::Busy);

                if !to_arm.is_empty() {
                    self.arm_members(&to_arm).await?;
                }
                self.fire_members(&to_fire).await?;
                records.push(self.collect(timeout).await?);
                debug!("Cycle {}/{} complete", cycle + 1, cycles);
            }

            self.disarm().await?;
            info!("Finished {} cycles", records.len());
            Ok::<_, GroupError>(records)
        }
        .instrument(span)
        .await
    }

    /// Abort every member concurrently
    pub async fn abort(&self) -> Result<()> {
        let results = self
            .fan_out(&self.all(), Operation::Abort, |device, _| async move {
                device.abort().await
            })
            .await;

        if results.iter().all(|(_, r)| r.is_ok()) {
            info!(group = %self.name, "Group aborted");
            return Ok(());
        }

        let mut statuses = vec![MemberStatus::NotAttempted; self.members.len()];
        for (index, result) in results {
            statuses[index] = match result {
                Ok(()) => MemberStatus::Aborted,
                Err(e) => MemberStatus::Failed(e),
            };
        }
        Err(GroupError::GroupAcquisition {
            group: self.name.clone(),
            outcomes: self.outcomes(statuses),
        })
    }

    /// Disarm every member that is still armed
    pub async fn disarm(&self) -> Result<()> {
        let states = self.states().await?;
        let armed = indices_where(&states, |s| s == DeviceState::Armed);
        let results = self
            .fan_out(&armed, Operation::Disarm, |device, _| async move {
                device.disarm().await
            })
            .await;

        match results.into_iter().find_map(|(_, r)| r.err()) {
            Some(e) => Err(GroupError::Device(e)),
            None => Ok(()),
        }
    }

    /// Lifecycle state of every member, in member order
    pub async fn states(&self) -> Result<Vec<DeviceState>> {
        let states = join_all(self.members.iter().map(|m| m.device.state())).await;
        Ok(states.into_iter().collect::<DeviceResult<Vec<_>>>()?)
    }

    fn all(&self) -> Vec<usize> {
        (0..self.members.len()).collect()
    }

    fn outcomes(&self, statuses: Vec<MemberStatus>) -> Vec<MemberOutcome> {
        self.members
            .iter()
            .zip(statuses)
            .map(|(member, status)| MemberOutcome::new(member.device.name(), status))
            .collect()
    }

    fn join_error(&self, index: usize, operation: Operation, err: JoinError) -> DeviceError {
        DeviceError::new(
            self.members[index].device.name(),
            operation,
            ErrorKind::Hardware(format!("member task failed: {}", err)),
        )
    }

    async fn fan_out<F, Fut, T>(
        &self,
        indices: &[usize],
        operation: Operation,
        op: F,
    ) -> Vec<(usize, DeviceResult<T>)>
    where
        F: Fn(SharedDevice, TriggerConfig) -> Fut,
        Fut: Future<Output = DeviceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handles = indices.iter().map(|&index| {
            let member = &self.members[index];
            let handle = tokio::spawn(op(member.device.clone(), member.config));
            async move { (index, handle.await) }
        });

        join_all(handles)
            .await
            .into_iter()
            .map(|(index, joined)| {
                let result = joined.unwrap_or_else(|e| Err(self.join_error(index, operation, e)));
                (index, result)
            })
            .collect()
    }

    async fn arm_members(&self, indices: &[usize]) -> Result<Vec<MemberOutcome>> {
        let results = self
            .fan_out(indices, Operation::Arm, |device, config| async move {
                device.arm(config).await
            })
            .await;

        if results.iter().all(|(_, r)| r.is_ok()) {
            debug!(group = %self.name, "Armed {} members for {}", indices.len(), self.config);
            let mut statuses = vec![MemberStatus::NotAttempted; self.members.len()];
            for &index in indices {
                statuses[index] = MemberStatus::Armed;
            }
            return Ok(self.outcomes(statuses));
        }

        let armed: Vec<usize> = results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(index, _)| *index)
            .collect();
        let rollback = self
            .fan_out(&armed, Operation::Disarm, |device, _| async move {
                device.disarm().await
            })
            .await;

        let mut statuses = vec![MemberStatus::NotAttempted; self.members.len()];
        for (index, result) in results {
            statuses[index] = match result {
                Ok(()) => MemberStatus::Disarmed,
                Err(e) => MemberStatus::Failed(e),
            };
        }
        for (index, result) in rollback {
            if let Err(e) = result {
                warn!(group = %self.name, "Rollback failed: {}", e);
                statuses[index] = MemberStatus::Failed(e);
            }
        }

        let err = GroupError::PartialArm {
            group: self.name.clone(),
            outcomes: self.outcomes(statuses),
        };
        warn!("{}", err);
        Err(err)
    }

    async fn fire_members(&self, indices: &[usize]) -> Result<Vec<MemberOutcome>> {
        let results = self
            .fan_out(indices, Operation::Trigger, |device, _| async move {
                device.trigger().await
            })
            .await;

        if results.iter().any(|(_, r)| r.is_err()) {
            self.abort_quietly().await;
            let mut statuses = vec![MemberStatus::Aborted; self.members.len()];
            for (index, result) in results {
                if let Err(e) = result {
                    statuses[index] = MemberStatus::Failed(e);
                }
            }
            let err = GroupError::GroupAcquisition {
                group: self.name.clone(),
                outcomes: self.outcomes(statuses),
            };
            warn!("{}", err);
            return Err(err);
        }

        if !indices.is_empty() && !self.config.source.is_software() {
            match &self.line {
                Some(line) => {
                    let listeners = line.pulse();
                    debug!(group = %self.name, "Pulsed line {} ({} listeners)", line.id(), listeners);
                    if listeners == 0 {
                        warn!(group = %self.name, "No device is listening on line {}", line.id());
                    }
                }
                None => debug!(group = %self.name, "Waiting for an external pulse"),
            }
        }

        let mut statuses = vec![MemberStatus::NotAttempted; self.members.len()];
        for &index in indices {
            statuses[index] = MemberStatus::Triggered;
        }
        Ok(self.outcomes(statuses))
    }

    async fn abort_quietly(&self) {
        let results = self
            .fan_out(&self.all(), Operation::Abort, |device, _| async move {
                device.abort().await
            })
            .await;
        for (_, result) in results {
            if let Err(e) = result {
                warn!(group = %self.name, "Abort failed: {}", e);
            }
        }
    }
}

fn indices_where<F: Fn(DeviceState) -> bool>(states: &[DeviceState], pred: F) -> Vec<usize> {
    states
        .iter()
        .enumerate()
        .filter(|(_, s)| pred(**s))
        .map(|(index, _)| index)
        .collect()
}

/// Builder for acquisition groups
#[derive(Debug)]
pub struct GroupBuilder {
    name: String,
    config: TriggerConfig,
    members: Vec<Member>,
    line: Option<TriggerLine>,
}

impl GroupBuilder {
    /// Create a builder for a group triggered by `config`
    pub fn new<S: Into<String>>(name: S, config: TriggerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            members: Vec::new(),
            line: None,
        }
    }

    /// Add a member using the group configuration
    pub fn member(mut self, device: SharedDevice) -> Self {
        let config = self.config;
        self.members.push(Member { device, config });
        self
    }

    /// Add several members using the group configuration
    pub fn members<I: IntoIterator<Item = SharedDevice>>(self, devices: I) -> Self {
        devices.into_iter().fold(self, |builder, device| builder.member(device))
    }

    /// Add a member with its own trigger mode
    pub fn member_with_mode(mut self, device: SharedDevice, mode: TriggerMode) -> Self {
        let mut config = TriggerConfig::new(self.config.source, mode);
        if mode != TriggerMode::Once {
            config.count = self.config.count;
        }
        self.members.push(Member { device, config });
        self
    }

    /// Add a member with its own configuration; the source must match the group's
    pub fn member_with_config(mut self, device: SharedDevice, config: TriggerConfig) -> Self {
        self.members.push(Member { device, config });
        self
    }

    /// Pulse `line` when the group fires
    pub fn line(mut self, line: TriggerLine) -> Self {
        self.line = Some(line);
        self
    }

    /// Validate and build the group
    pub fn build(self) -> Result<AcquisitionGroup> {
        if self.members.is_empty() {
            return Err(GroupError::EmptyGroup(self.name));
        }

        let mut seen = HashSet::new();
        for member in &self.members {
            let device = member.device.name();
            if !seen.insert(device.to_string()) {
                return Err(GroupError::DuplicateMember {
                    group: self.name,
                    device: device.to_string(),
                });
            }
            if member.config.source != self.config.source {
                return Err(GroupError::TriggerMismatch {
                    group: self.name,
                    device: device.to_string(),
                    expected: self.config.source,
                    found: member.config.source,
                });
            }
        }

        if let Some(line) = &self.line {
            if self.config.source.line() != Some(line.id()) {
                return Err(GroupError::LineMismatch {
                    group: self.name,
                    line: line.id(),
                    configured: self.config.source,
                });
            }
        }

        debug!(group = %self.name, "Built group of {} members", self.members.len());
        Ok(AcquisitionGroup {
            name: self.name,
            config: self.config,
            members: self.members,
            line: self.line,
            collections: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scopeflow_core::types::Value;
    use scopeflow_devices::devices::{SimCamera, SimControl, SimFault, SimFilterWheel, SimStage};
    use scopeflow_devices::{AcquisitionData, TriggerEdge};

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn ready(device: SharedDevice) -> SharedDevice {
        device.initialize().await.unwrap();
        device
    }

    async fn camera(name: &str, control: Arc<SimControl>, wiring: Vec<TriggerLine>) -> SharedDevice {
        ready(SimCamera::build(name, control, wiring).unwrap().into_shared()).await
    }

    async fn stage(control: Arc<SimControl>, wiring: Vec<TriggerLine>) -> SharedDevice {
        ready(SimStage::build("stage", control, wiring).unwrap().into_shared()).await
    }

    #[tokio::test]
    async fn test_build_validation() {
        let config = TriggerConfig::software_once();
        assert!(matches!(
            GroupBuilder::new("empty", config).build(),
            Err(GroupError::EmptyGroup(_))
        ));

        let cam = camera("cam", SimControl::new(), vec![]).await;
        let err = GroupBuilder::new("dup", config)
            .member(cam.clone())
            .member(cam.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, GroupError::DuplicateMember { device, .. } if device == "cam"));

        let other = stage(SimControl::new(), vec![]).await;
        let err = GroupBuilder::new("mixed", config)
            .member(cam.clone())
            .member_with_config(
                other,
                TriggerConfig::hardware(1, TriggerEdge::Rising, TriggerMode::Once),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, GroupError::TriggerMismatch { device, .. } if device == "stage"));

        let err = GroupBuilder::new("wrong-line", TriggerConfig::hardware(1, TriggerEdge::Rising, TriggerMode::Once))
            .member(cam)
            .line(TriggerLine::new(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, GroupError::LineMismatch { line: 2, .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_hardware_triggered_run() {
        let line = TriggerLine::new(0);
        let control = SimControl::new();
        let cam = camera("camera", control.clone(), vec![line.clone()]).await;
        let xy = stage(control.clone(), vec![line.clone()]).await;
        let wheel = ready(
            SimFilterWheel::build("wheel", control, vec![line.clone()], 6)
                .unwrap()
                .into_shared(),
        )
        .await;
        wheel.set_setting("position", Value::Integer(3)).await.unwrap();

        let group = GroupBuilder::new(
            "scan",
            TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Once),
        )
        .members([cam.clone(), xy.clone(), wheel.clone()])
        .line(line.clone())
        .build()
        .unwrap();

        let record = group.run(TIMEOUT).await.unwrap();
        assert_eq!(record.devices(), vec!["camera", "stage", "wheel"]);
        assert!(record.get("camera").unwrap().data.as_frame().is_some());
        assert_eq!(
            record.get("wheel").unwrap().data,
            AcquisitionData::SwitchPosition { position: 3 }
        );
        assert_eq!(line.pulses_emitted(), 1);
        for state in group.states().await.unwrap() {
            assert_eq!(state, DeviceState::Enabled);
        }
    }

    #[tokio::test]
    async fn test_partial_arm_disarms_the_others() {
        let line = TriggerLine::new(1);
        let first = camera("cam-a", SimControl::new(), vec![line.clone()]).await;
        let middle = stage(SimControl::new(), vec![line.clone()]).await;
        let last = camera("cam-b", SimControl::new(), vec![line.clone()]).await;

        let group = GroupBuilder::new(
            "burst",
            TriggerConfig::hardware(1, TriggerEdge::Rising, TriggerMode::Start).with_count(4),
        )
        .members([first.clone(), middle.clone(), last.clone()])
        .line(line)
        .build()
        .unwrap();

        let err = group.arm().await.unwrap_err();
        assert_eq!(err.failed_members(), vec!["stage"]);
        let outcomes = err.outcomes().unwrap();
        assert_eq!(outcomes[0].status, MemberStatus::Disarmed);
        assert!(matches!(
            outcomes[1].error().unwrap().kind,
            ErrorKind::UnsupportedTrigger { .. }
        ));
        assert_eq!(outcomes[2].status, MemberStatus::Disarmed);

        for device in [first, middle, last] {
            assert_eq!(device.state().await.unwrap(), DeviceState::Enabled);
        }
    }

    #[tokio::test]
    async fn test_member_failure_aborts_the_others() {
        let camera_control = SimControl::new();
        let stage_control = SimControl::new();
        let cam = camera("camera", camera_control.clone(), vec![]).await;
        let xy = stage(stage_control.clone(), vec![]).await;

        let group = GroupBuilder::new("pair", TriggerConfig::software(TriggerMode::Multiple))
            .members([cam.clone(), xy.clone()])
            .build()
            .unwrap();
        group.arm().await.unwrap();
        group.fire().await.unwrap();

        stage_control.set_stalled(true);
        camera_control.fail_next(SimFault::Read);
        let err = group.collect(TIMEOUT).await.unwrap_err();

        let outcomes = err.outcomes().unwrap();
        assert!(matches!(outcomes[0].error().unwrap().kind, ErrorKind::Hardware(_)));
        assert_eq!(outcomes[1].status, MemberStatus::Aborted);
        assert_eq!(cam.state().await.unwrap(), DeviceState::Fault);
        assert_eq!(xy.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_collect_timeout_is_reported_per_member() {
        let control = SimControl::new();
        let cam = camera("camera", control.clone(), vec![]).await;
        let group = GroupBuilder::new("slow", TriggerConfig::software_once())
            .member(cam.clone())
            .build()
            .unwrap();
        group.arm().await.unwrap();
        group.fire().await.unwrap();

        control.set_stalled(true);
        let err = group.collect(Duration::from_millis(30)).await.unwrap_err();
        assert!(err.outcomes().unwrap()[0].error().unwrap().is_timeout());
        assert_eq!(cam.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_software_cycles() {
        let control = SimControl::new();
        let cam = camera("camera", control.clone(), vec![]).await;
        let xy = stage(control, vec![]).await;
        xy.set_setting("step_x", Value::Float(5.0)).await.unwrap();

        let group = GroupBuilder::new("tiles", TriggerConfig::software(TriggerMode::Multiple))
            .members([cam.clone(), xy.clone()])
            .build()
            .unwrap();

        let records = group.run_cycles(3, TIMEOUT).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.cycle).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let xs: Vec<f64> = records
            .iter()
            .map(|r| match &r.get("stage").unwrap().data {
                AcquisitionData::Position(p) => p.axis("x").unwrap(),
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert_eq!(xs, vec![0.0, 5.0, 10.0]);
        assert_eq!(cam.state().await.unwrap(), DeviceState::Enabled);
        assert_eq!(xy.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_start_mode_cycles_use_one_pulse() {
        let line = TriggerLine::new(0);
        let cam = camera("camera", SimControl::new(), vec![line.clone()]).await;
        cam.set_setting("exposure_time", Value::Float(0.001)).await.unwrap();

        let group = GroupBuilder::new(
            "burst",
            TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Start).with_count(3),
        )
        .member(cam.clone())
        .line(line.clone())
        .build()
        .unwrap();

        let records = group.run_cycles(3, TIMEOUT).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(line.pulses_emitted(), 1);
        assert_eq!(cam.state().await.unwrap(), DeviceState::Enabled);
    }

    #[tokio::test]
    async fn test_once_members_are_rearmed_each_cycle() {
        let control = SimControl::new();
        let cam = camera("camera", control.clone(), vec![]).await;
        let xy = stage(control, vec![]).await;

        let group = GroupBuilder::new("mixed-modes", TriggerConfig::software(TriggerMode::Multiple))
            .member(cam.clone())
            .member_with_mode(xy.clone(), TriggerMode::Once)
            .build()
            .unwrap();
        assert_eq!(group.member_config("stage").unwrap().mode, TriggerMode::Once);

        let records = group.run_cycles(2, TIMEOUT).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("camera").unwrap().trigger_index, 2);
        assert_eq!(records[1].get("stage").unwrap().trigger_index, 1);
    }

    #[tokio::test]
    async fn test_abort_returns_members_to_enabled() {
        let control = SimControl::new();
        let cam = camera("camera", control.clone(), vec![]).await;
        let group = GroupBuilder::new("idle", TriggerConfig::software(TriggerMode::Multiple))
            .member(cam.clone())
            .build()
            .unwrap();
        group.arm().await.unwrap();
        assert_eq!(cam.state().await.unwrap(), DeviceState::Armed);
        group.abort().await.unwrap();
        assert_eq!(cam.state().await.unwrap(), DeviceState::Enabled);
    }
}
