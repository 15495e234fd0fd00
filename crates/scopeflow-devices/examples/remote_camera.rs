use std::time::Duration;

use scopeflow_core::config::RemoteConfig;
use scopeflow_core::types::Value;
use scopeflow_devices::devices::{SimCamera, SimControl};
use scopeflow_devices::{
    Acquire, DeviceEvent, DeviceServer, RemoteDevice, TriggerConfig, TriggerEdge, TriggerLine,
    TriggerMode,
};

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // A camera with its external trigger input cabled to line 0
    let line = TriggerLine::new(0);
    let camera = SimCamera::build("Camera 1", SimControl::new(), vec![line.clone()])?;

    // Log device events as they arrive
    let mut event_rx = camera.subscribe()?;
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                DeviceEvent::StateChanged { from, to, .. } => {
                    info!("State changed: {} -> {}", from, to);
                }
                DeviceEvent::SettingChanged { setting, value, .. } => {
                    info!("Setting changed: {} = {}", setting, value);
                }
                DeviceEvent::DataAcquired { sequence, .. } => {
                    info!("Acquisition #{} ready", sequence);
                }
                DeviceEvent::Fault { message, .. } => {
                    info!("Device fault: {}", message);
                }
            }
        }
    });

    // Serve the camera and connect a proxy to it
    let (server, transport) = DeviceServer::spawn(camera.into_shared(), &RemoteConfig::default());
    let remote = RemoteDevice::connect(transport).await?;
    info!("Connected to {} ({})", remote.name(), remote.info().kind);

    remote.initialize().await?;

    // Print the settings the camera exposes
    for setting in remote.describe_settings().await? {
        info!(
            "{:<14} {:<15} {}{}",
            setting.name,
            setting.type_tag,
            setting.value,
            if setting.readonly { " (read-only)" } else { "" }
        );
    }

    remote.set_setting("exposure_time", Value::Float(0.01)).await?;
    remote.set_setting("binning", Value::from("2x2")).await?;

    // Three frames, each started by a pulse on line 0
    let config = TriggerConfig::hardware(0, TriggerEdge::Rising, TriggerMode::Multiple).with_count(3);
    remote.arm(config).await?;
    info!("Armed for {}", config);

    for _ in 0..3 {
        remote.trigger().await?;
        line.pulse();
        let acquisition = remote.fetch(Duration::from_secs(1)).await?;
        if let Some(frame) = acquisition.data.as_frame() {
            info!(
                "Frame {}: {}x{}, mean {:.1}",
                acquisition.trigger_index,
                frame.width,
                frame.height,
                frame.mean()
            );
        }
    }

    info!("Device State: {}", remote.state().await?);

    remote.shutdown().await?;
    drop(remote);
    server.await?;

    Ok(())
}
