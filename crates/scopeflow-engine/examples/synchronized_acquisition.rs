use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use scopeflow_core::config::ConfigBuilder;
use scopeflow_core::types::Value;
use scopeflow_devices::devices::{SimCamera, SimControl, SimFault, SimFilterWheel, SimLaser, SimStage};
use scopeflow_devices::{
    Acquire, AcquisitionData, DeviceRegistry, DeviceServer, RemoteDevice, TriggerConfig,
    TriggerEdge, TriggerLine, TriggerMode,
};
use scopeflow_engine::{Controller, GroupError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults, overridable through SCOPEFLOW__ACQUISITION__FETCH_TIMEOUT_MS and friends
    let config = ConfigBuilder::new()
        .with_environment_prefix("SCOPEFLOW")
        .build()
        .context("loading configuration")?;
    scopeflow_core::init_with_config(&config)?;
    scopeflow_devices::init()?;
    scopeflow_engine::init()?;

    // One trigger cable, daisy-chained to every device
    let line = TriggerLine::new(0);
    let wiring = vec![line.clone()];
    let control = SimControl::new();

    let registry = Arc::new(DeviceRegistry::new());
    registry.register(SimCamera::build("camera", control.clone(), wiring.clone())?.into_shared())?;
    registry.register(SimFilterWheel::build("emission-filter", control.clone(), wiring.clone(), 6)?.into_shared())?;
    registry.register(SimLaser::build("laser-561", control.clone(), wiring.clone(), 561, 100.0)?.into_shared())?;

    // The stage lives behind a device server, as it would on another machine
    let stage = SimStage::build("stage", control.clone(), wiring.clone())?.into_shared();
    let (_server, transport) = DeviceServer::spawn(stage, &config.remote);
    registry.register(RemoteDevice::connect(transport).await?.into_shared())?;

    let controller = Controller::with_config(registry, config.acquisition.clone());
    controller.initialize().await.context("initializing devices")?;

    let camera = controller.registry().get("camera")?;
    camera.set_setting("exposure_time", Value::Float(0.002)).await?;
    camera.set_setting("binning", Value::from("2x2")).await?;
    let stage = controller.registry().get("stage")?;
    stage.set_setting("step_x", Value::Float(25.0)).await?;

    // A tile scan: every pulse moves the stage one step and takes a frame
    controller
        .create_group(
            "tile-scan",
            &["camera", "stage", "laser-561"],
            TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Multiple),
            Some(line.clone()),
        )
        .await?;

    for record in controller.run_cycles("tile-scan", 4, None).await? {
        let x = match record.get("stage").map(|a| &a.data) {
            Some(AcquisitionData::Position(p)) => p.axis("x").unwrap_or_default(),
            _ => f64::NAN,
        };
        let mean = record
            .get("camera")
            .and_then(|a| a.data.as_frame())
            .map(|f| f.mean())
            .unwrap_or_default();
        info!("Tile {} at x = {} um: mean intensity {:.1}", record.cycle, x, mean);
    }

    // A single snapshot with the filter wheel in the chain
    controller
        .create_group(
            "snapshot",
            &["camera", "emission-filter"],
            TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Once),
            Some(line.clone()),
        )
        .await?;
    let record = controller.run("snapshot", None).await?;
    println!("{}", record.to_json()?);

    // A readout failure on one member aborts the rest of the group
    control.fail_next(SimFault::Read);
    match controller.run("snapshot", Some(Duration::from_secs(1))).await {
        Err(GroupError::GroupAcquisition { outcomes, .. }) => {
            for outcome in outcomes {
                warn!("{}", outcome);
            }
        }
        other => warn!("Expected a failed acquisition, got {:?}", other.map(|r| r.run)),
    }

    info!("Pulses emitted on line {}: {}", line.id(), line.pulses_emitted());
    controller.shutdown().await?;
    Ok(())
}
