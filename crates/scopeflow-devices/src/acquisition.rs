/*!
 * Data produced by a trigger-and-fetch cycle.
 */
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single camera frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel intensities
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Create a frame, checking that the pixel buffer matches the shape
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Option<Self> {
        if pixels.len() as u64 != u64::from(width) * u64::from(height) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Mean intensity
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / self.pixels.len() as f64
    }
}

/// Position of a multi-axis device, in micrometres per axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Axis name to coordinate
    pub axes: BTreeMap<String, f64>,
}

impl Position {
    /// Build a position from (axis, coordinate) pairs
    pub fn from_axes<I, S>(axes: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            axes: axes.into_iter().map(|(a, v)| (a.into(), v)).collect(),
        }
    }

    /// Coordinate of one axis
    pub fn axis(&self, name: &str) -> Option<f64> {
        self.axes.get(name).copied()
    }
}

/// Payload of one acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionData {
    /// Camera frame
    Frame(Frame),
    /// Stage position reached
    Position(Position),
    /// Switch position reached (filter wheel slot)
    SwitchPosition {
        /// Slot index
        position: u32,
    },
    /// Light emitted during the triggered window
    Emission {
        /// Output power in mW
        power_mw: f64,
        /// Length of the emission window in ms
        duration_ms: u64,
    },
}

impl AcquisitionData {
    /// Short name of the payload kind
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionData::Frame(_) => "frame",
            AcquisitionData::Position(_) => "position",
            AcquisitionData::SwitchPosition { .. } => "switch_position",
            AcquisitionData::Emission { .. } => "emission",
        }
    }

    /// The frame, if this is camera data
    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            AcquisitionData::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Result of one successful trigger-and-fetch cycle
///
/// Owned by the caller; the device keeps no reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Device that produced the data
    pub device: String,
    /// Per-device sequence number, starting at 1
    pub sequence: u64,
    /// Index of the trigger within the current arming, starting at 1
    pub trigger_index: u32,
    /// When the data was fetched
    pub timestamp: DateTime<Utc>,
    /// Payload
    pub data: AcquisitionData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape_is_checked() {
        assert!(Frame::new(2, 2, vec![0; 3]).is_none());
        let frame = Frame::new(2, 2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(frame.pixel(1, 1), Some(4));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.mean(), 2.5);
    }

    #[test]
    fn test_position_axes() {
        let position = Position::from_axes([("x", 10.0), ("y", -2.5)]);
        assert_eq!(position.axis("y"), Some(-2.5));
        assert_eq!(position.axis("z"), None);
    }

    #[test]
    fn test_data_is_tagged() {
        let data = AcquisitionData::SwitchPosition { position: 3 };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "switch_position");
        assert_eq!(json["position"], 3);
        assert_eq!(data.kind(), "switch_position");
    }
}
