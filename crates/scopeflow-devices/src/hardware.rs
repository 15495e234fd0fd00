/*!
 * Vendor boundary.
 *
 * A `Hardware` backend is the only code that talks to a physical (or
 * simulated) instrument. It is always driven from behind the device lock, so
 * implementations never see concurrent calls and take `&mut self`. Blocking
 * vendor calls are expected to be wrapped as polls: `read` must return
 * promptly and report progress instead of waiting for data.
 */
use std::fmt::Debug;

use async_trait::async_trait;

use scopeflow_core::types::Value;

use crate::acquisition::{AcquisitionData, Position};
use crate::error::HwResult;
use crate::trigger::TriggerConfig;

/// Progress of a pending acquisition, as seen by one poll
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStatus {
    /// Armed and still waiting for a trigger
    Idle,
    /// Triggered, data not ready yet
    Acquiring,
    /// Data for one trigger is ready
    Ready(AcquisitionData),
}

/// Backend for one instrument
#[async_trait]
pub trait Hardware: Send + Debug + 'static {
    /// Hardware handshake
    async fn initialize(&mut self) -> HwResult<()>;

    /// Leave a period of inactivity
    async fn enable(&mut self) -> HwResult<()> {
        Ok(())
    }

    /// Enter a period of inactivity
    async fn disable(&mut self) -> HwResult<()> {
        Ok(())
    }

    /// Push an already validated setting value to the instrument
    async fn apply_setting(&mut self, name: &str, value: &Value) -> HwResult<()>;

    /// Prepare for the given trigger configuration
    async fn arm(&mut self, config: &TriggerConfig) -> HwResult<()>;

    /// Fire a software trigger
    async fn trigger_now(&mut self) -> HwResult<()>;

    /// Poll the pending acquisition without blocking
    async fn read(&mut self) -> HwResult<ReadStatus>;

    /// Current position, for positionable or switchable instruments
    async fn position(&mut self) -> HwResult<Option<Position>> {
        Ok(None)
    }

    /// Cancel any pending acquisition and discard partial data
    async fn abort(&mut self) -> HwResult<()>;

    /// Release the instrument
    async fn shutdown(&mut self) -> HwResult<()> {
        Ok(())
    }
}
