/*!
 * Remote access to devices.
 *
 * A `DeviceServer` owns one device and answers serialized `Request`s; a
 * `RemoteDevice` implements `Acquire` by sending requests over a `Transport`.
 * `ChannelTransport` carries JSON over an in-process channel.
 */
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scopeflow_core::config::RemoteConfig;
use scopeflow_core::types::Value;
use scopeflow_core::utils::{duration_to_millis, millis_to_duration, spawn_and_log};

use crate::acquisition::{Acquisition, Position};
use crate::device::{Acquire, DeviceInfo, SettingOutcome, SharedDevice};
use crate::error::{DeviceError, Operation, Result};
use crate::settings::SettingDescription;
use crate::state::DeviceState;
use crate::trigger::TriggerConfig;

/// One device operation, as sent over a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Static device description
    Info,
    /// Current lifecycle state
    State,
    /// Hardware handshake
    Initialize,
    /// Leave the disabled state
    Enable,
    /// Enter the disabled state
    Disable,
    /// Describe all settings
    DescribeSettings,
    /// Read one setting
    GetSetting {
        /// Setting name
        name: String,
    },
    /// Read all settings
    GetAllSettings,
    /// Write one setting
    SetSetting {
        /// Setting name
        name: String,
        /// Requested value
        value: Value,
    },
    /// Write several settings in order
    UpdateSettings {
        /// Name/value pairs
        values: Vec<(String, Value)>,
    },
    /// Active trigger configuration
    TriggerConfig,
    /// Arm for triggered acquisition
    Arm {
        /// Trigger configuration
        config: TriggerConfig,
    },
    /// Leave the armed state
    Disarm,
    /// Fire a software trigger
    Trigger,
    /// Wait for the data of one trigger
    Fetch {
        /// How long the device may wait
        timeout_ms: u64,
    },
    /// Cancel the pending acquisition
    Abort,
    /// Re-initialize from any state
    Reset,
    /// Release the hardware
    Shutdown,
    /// Current position
    Position,
}

impl Request {
    /// The device operation this request performs
    pub fn operation(&self) -> Operation {
        match self {
            Request::Info => Operation::Connect,
            Request::State | Request::DescribeSettings | Request::TriggerConfig => Operation::Describe,
            Request::Initialize => Operation::Initialize,
            Request::Enable => Operation::Enable,
            Request::Disable => Operation::Disable,
            Request::GetSetting { .. } | Request::GetAllSettings => Operation::GetSetting,
            Request::SetSetting { .. } => Operation::SetSetting,
            Request::UpdateSettings { .. } => Operation::UpdateSettings,
            Request::Arm { .. } => Operation::Arm,
            Request::Disarm => Operation::Disarm,
            Request::Trigger => Operation::Trigger,
            Request::Fetch { .. } => Operation::Fetch,
            Request::Abort => Operation::Abort,
            Request::Reset => Operation::Reset,
            Request::Shutdown => Operation::Shutdown,
            Request::Position => Operation::Position,
        }
    }
}

/// The answer to a `Request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Response {
    /// Device description
    Info(DeviceInfo),
    /// Lifecycle state
    State(DeviceState),
    /// The operation succeeded without a payload
    Done,
    /// Setting descriptions
    Settings(Vec<SettingDescription>),
    /// One setting value
    Value(Value),
    /// All setting values
    Values(Vec<(String, Value)>),
    /// Per-setting outcomes of a batch update
    Outcomes(Vec<SettingOutcome>),
    /// Active trigger configuration
    TriggerConfig(Option<TriggerConfig>),
    /// One acquisition
    Acquisition(Acquisition),
    /// Current position
    Position(Position),
    /// The device reported an error
    Error(DeviceError),
}

/// Execute one request against a device
pub async fn dispatch(device: &dyn Acquire, request: Request) -> Response {
    let result = match request {
        Request::Info => Ok(Response::Info(device.info().clone())),
        Request::State => device.state().await.map(Response::State),
        Request::Initialize => device.initialize().await.map(|_| Response::Done),
        Request::Enable => device.enable().await.map(|_| Response::Done),
        Request::Disable => device.disable().await.map(|_| Response::Done),
        Request::DescribeSettings => device.describe_settings().await.map(Response::Settings),
        Request::GetSetting { name } => device.get_setting(&name).await.map(Response::Value),
        Request::GetAllSettings => device.get_all_settings().await.map(Response::Values),
        Request::SetSetting { name, value } => {
            device.set_setting(&name, value).await.map(Response::Value)
        }
        Request::UpdateSettings { values } => {
            device.update_settings(values).await.map(Response::Outcomes)
        }
        Request::TriggerConfig => device.trigger_config().await.map(Response::TriggerConfig),
        Request::Arm { config } => device.arm(config).await.map(|_| Response::Done),
        Request::Disarm => device.disarm().await.map(|_| Response::Done),
        Request::Trigger => device.trigger().await.map(|_| Response::Done),
        Request::Fetch { timeout_ms } => device
            .fetch(millis_to_duration(timeout_ms))
            .await
            .map(Response::Acquisition),
        Request::Abort => device.abort().await.map(|_| Response::Done),
        Request::Reset => device.reset().await.map(|_| Response::Done),
        Request::Shutdown => device.shutdown().await.map(|_| Response::Done),
        Request::Position => device.position().await.map(Response::Position),
    };
    result.unwrap_or_else(Response::Error)
}

/// Error type for transports
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The other end has gone away
    #[error("transport closed")]
    Closed,

    /// No answer arrived in time
    #[error("no response within {0} ms")]
    Timeout(u64),

    /// A message could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

/// A request/response channel to one device
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send a request and wait for its response
    async fn call(&self, request: Request) -> std::result::Result<Response, TransportError>;
}

#[derive(Debug)]
struct Envelope {
    payload: String,
    reply: oneshot::Sender<String>,
}

/// Serves one device to remote callers
#[derive(Debug)]
pub struct DeviceServer {
    device: SharedDevice,
    receiver: mpsc::Receiver<Envelope>,
}

impl DeviceServer {
    /// Create a server and a transport connected to it
    pub fn new(device: SharedDevice, config: &RemoteConfig) -> (Self, ChannelTransport) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let transport = ChannelTransport {
            sender,
            request_timeout: config.request_timeout(),
        };
        (Self { device, receiver }, transport)
    }

    /// Start serving on a background task
    pub fn spawn(device: SharedDevice, config: &RemoteConfig) -> (JoinHandle<()>, ChannelTransport) {
        let (server, transport) = Self::new(device, config);
        (tokio::spawn(server.run()), transport)
    }

    /// Answer requests until every transport has been dropped
    ///
    /// Requests run one at a time in arrival order. A fetch runs on its own
    /// task so that an abort sent while it waits is still answered.
    pub async fn run(mut self) {
        let name = self.device.name().to_string();
        info!(device = %name, "Device server started");

        while let Some(envelope) = self.receiver.recv().await {
            let request = match serde_json::from_str::<Request>(&envelope.payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(device = %name, "Undecodable request: {}", e);
                    let response = Response::Error(DeviceError::connection(
                        &name,
                        Operation::Connect,
                        format!("undecodable request: {}", e),
                    ));
                    if let Err(e) = reply(envelope.reply, &response) {
                        debug!(device = %name, "Reply not delivered: {}", e);
                    }
                    continue;
                }
            };

            debug!(device = %name, operation = %request.operation(), "Remote request");
            if matches!(request, Request::Fetch { .. }) {
                // Fetch waits on its own task so an abort request can still be served.
                let device = self.device.clone();
                spawn_and_log(&format!("remote fetch on {}", name), async move {
                    let response = dispatch(device.as_ref(), request).await;
                    reply(envelope.reply, &response)
                });
            } else {
                let response = dispatch(self.device.as_ref(), request).await;
                if let Err(e) = reply(envelope.reply, &response) {
                    debug!(device = %name, "Reply not delivered: {}", e);
                }
            }
        }

        info!(device = %name, "Device server stopped");
    }
}

fn reply(sender: oneshot::Sender<String>, response: &Response) -> std::result::Result<(), TransportError> {
    let payload = serde_json::to_string(response).map_err(|e| {
        error!("Failed to encode response: {}", e);
        TransportError::from(e)
    })?;
    sender.send(payload).map_err(|_| TransportError::Closed)
}

/// In-process transport carrying JSON messages
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Envelope>,
    request_timeout: Duration,
}

impl ChannelTransport {
    /// Time allowed for one request, on top of a fetch's own timeout
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn call(&self, request: Request) -> std::result::Result<Response, TransportError> {
        let limit = match &request {
            Request::Fetch { timeout_ms } => self.request_timeout + millis_to_duration(*timeout_ms),
            _ => self.request_timeout,
        };

        let payload = serde_json::to_string(&request)?;
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Envelope { payload, reply })
            .await
            .map_err(|_| TransportError::Closed)?;

        match tokio::time::timeout(limit, response).await {
            Ok(Ok(payload)) => Ok(serde_json::from_str(&payload)?),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(duration_to_millis(limit))),
        }
    }
}

/// A device reached through a transport
#[derive(Debug, Clone)]
pub struct RemoteDevice {
    info: DeviceInfo,
    transport: Arc<dyn Transport>,
}

impl RemoteDevice {
    /// Connect to a served device and fetch its description
    pub async fn connect<T: Transport + 'static>(transport: T) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let response = transport
            .call(Request::Info)
            .await
            .map_err(|e| DeviceError::connection("<remote>", Operation::Connect, e.to_string()))?;

        match response {
            Response::Info(info) => {
                debug!(device = %info.name, "Connected to remote device");
                Ok(Self { info, transport })
            }
            Response::Error(e) => Err(e),
            other => Err(DeviceError::connection(
                "<remote>",
                Operation::Connect,
                format!("unexpected response {:?}", other),
            )),
        }
    }

    /// Wrap the proxy for sharing
    pub fn into_shared(self) -> SharedDevice {
        Arc::new(self)
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let operation = request.operation();
        match self.transport.call(request).await {
            Ok(Response::Error(e)) => Err(e),
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(device = %self.info.name, %operation, "Transport failure: {}", e);
                Err(DeviceError::connection(&self.info.name, operation, e.to_string()))
            }
        }
    }

    async fn call_done(&self, request: Request) -> Result<()> {
        let operation = request.operation();
        match self.call(request).await? {
            Response::Done => Ok(()),
            other => Err(self.unexpected(operation, other)),
        }
    }

    fn unexpected(&self, operation: Operation, response: Response) -> DeviceError {
        DeviceError::connection(
            &self.info.name,
            operation,
            format!("unexpected response {:?}", response),
        )
    }
}

#[async_trait]
impl Acquire for RemoteDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn state(&self) -> Result<DeviceState> {
        match self.call(Request::State).await? {
            Response::State(state) => Ok(state),
            other => Err(self.unexpected(Operation::Describe, other)),
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.call_done(Request::Initialize).await
    }

    async fn enable(&self) -> Result<()> {
        self.call_done(Request::Enable).await
    }

    async fn disable(&self) -> Result<()> {
        self.call_done(Request::Disable).await
    }

    async fn describe_settings(&self) -> Result<Vec<SettingDescription>> {
        match self.call(Request::DescribeSettings).await? {
            Response::Settings(settings) => Ok(settings),
            other => Err(self.unexpected(Operation::Describe, other)),
        }
    }

    async fn get_setting(&self, name: &str) -> Result<Value> {
        let request = Request::GetSetting {
            name: name.to_string(),
        };
        match self.call(request).await? {
            Response::Value(value) => Ok(value),
            other => Err(self.unexpected(Operation::GetSetting, other)),
        }
    }

    async fn get_all_settings(&self) -> Result<Vec<(String, Value)>> {
        match self.call(Request::GetAllSettings).await? {
            Response::Values(values) => Ok(values),
            other => Err(self.unexpected(Operation::GetSetting, other)),
        }
    }

    async fn set_setting(&self, name: &str, value: Value) -> Result<Value> {
        let request = Request::SetSetting {
            name: name.to_string(),
            value,
        };
        match self.call(request).await? {
            Response::Value(value) => Ok(value),
            other => Err(self.unexpected(Operation::SetSetting, other)),
        }
    }

    async fn update_settings(&self, values: Vec<(String, Value)>) -> Result<Vec<SettingOutcome>> {
        match self.call(Request::UpdateSettings { values }).await? {
            Response::Outcomes(outcomes) => Ok(outcomes),
            other => Err(self.unexpected(Operation::UpdateSettings, other)),
        }
    }

    async fn trigger_config(&self) -> Result<Option<TriggerConfig>> {
        match self.call(Request::TriggerConfig).await? {
            Response::TriggerConfig(config) => Ok(config),
            other => Err(self.unexpected(Operation::Describe, other)),
        }
    }

    async fn arm(&self, config: TriggerConfig) -> Result<()> {
        self.call_done(Request::Arm { config }).await
    }

    async fn disarm(&self) -> Result<()> {
        self.call_done(Request::Disarm).await
    }

    async fn trigger(&self) -> Result<()> {
        self.call_done(Request::Trigger).await
    }

    async fn fetch(&self, timeout: Duration) -> Result<Acquisition> {
        let request = Request::Fetch {
            timeout_ms: duration_to_millis(timeout),
        };
        match self.call(request).await? {
            Response::Acquisition(acquisition) => Ok(acquisition),
            other => Err(self.unexpected(Operation::Fetch, other)),
        }
    }

    async fn abort(&self) -> Result<()> {
        self.call_done(Request::Abort).await
    }

    async fn reset(&self) -> Result<()> {
        self.call_done(Request::Reset).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.call_done(Request::Shutdown).await
    }

    async fn position(&self) -> Result<Position> {
        match self.call(Request::Position).await? {
            Response::Position(position) => Ok(position),
            other => Err(self.unexpected(Operation::Position, other)),
        }
    }
}
