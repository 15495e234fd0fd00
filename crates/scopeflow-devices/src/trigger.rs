/*!
 * Trigger configuration, support matrices and trigger lines.
 *
 * A device declares which (source, mode) pairs it can honor and which hardware
 * lines are wired to it. A requested configuration is validated against that
 * declaration before it is accepted; unsupported requests are rejected, never
 * substituted with something the device can do instead.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

/// Number of pulses a trigger line buffers per subscriber
const LINE_CAPACITY: usize = 256;

/// Edge a hardware-triggered device reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    /// Low to high transition
    Rising,
    /// High to low transition
    Falling,
    /// Active for the duration of the pulse
    Pulse,
}

impl fmt::Display for TriggerEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEdge::Rising => f.write_str("rising"),
            TriggerEdge::Falling => f.write_str("falling"),
            TriggerEdge::Pulse => f.write_str("pulse"),
        }
    }
}

/// Where the trigger comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// An explicit `trigger()` call
    Software,
    /// An edge on a physical trigger line
    Hardware {
        /// Line number
        line: u8,
        /// Edge the device reacts to
        edge: TriggerEdge,
    },
}

impl TriggerSource {
    /// Kind of the source, without the line number
    pub fn kind(&self) -> SourceKind {
        match self {
            TriggerSource::Software => SourceKind::Software,
            TriggerSource::Hardware { edge, .. } => SourceKind::Hardware(*edge),
        }
    }

    /// Whether the source is a software trigger
    pub fn is_software(&self) -> bool {
        matches!(self, TriggerSource::Software)
    }

    /// Hardware line of the source, if any
    pub fn line(&self) -> Option<u8> {
        match self {
            TriggerSource::Software => None,
            TriggerSource::Hardware { line, .. } => Some(*line),
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Software => f.write_str("software"),
            TriggerSource::Hardware { line, edge } => write!(f, "line {} {}", line, edge),
        }
    }
}

/// Source kind as declared in a support matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Software trigger
    Software,
    /// Hardware trigger on the given edge
    Hardware(TriggerEdge),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Software => f.write_str("software"),
            SourceKind::Hardware(edge) => write!(f, "hardware {}", edge),
        }
    }
}

/// How a device responds to triggers once armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// One acquisition, then back to idle
    Once,
    /// One acquisition per trigger until disarmed or the count is exhausted
    Multiple,
    /// The first trigger starts an internally clocked sequence
    Start,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Once => f.write_str("once"),
            TriggerMode::Multiple => f.write_str("multiple"),
            TriggerMode::Start => f.write_str("start"),
        }
    }
}

/// A requested trigger configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger source
    pub source: TriggerSource,
    /// Trigger mode
    pub mode: TriggerMode,
    /// Number of acquisitions before the device returns to idle
    ///
    /// `None` means unbounded for `multiple` and `start`.
    #[serde(default)]
    pub count: Option<u32>,
}

impl TriggerConfig {
    /// Create a configuration without a count
    pub fn new(source: TriggerSource, mode: TriggerMode) -> Self {
        Self {
            source,
            mode,
            count: None,
        }
    }

    /// Software-triggered single acquisition
    pub fn software_once() -> Self {
        Self::new(TriggerSource::Software, TriggerMode::Once)
    }

    /// Software-triggered configuration in the given mode
    pub fn software(mode: TriggerMode) -> Self {
        Self::new(TriggerSource::Software, mode)
    }

    /// Hardware-triggered configuration on `line`
    pub fn hardware(line: u8, edge: TriggerEdge, mode: TriggerMode) -> Self {
        Self::new(TriggerSource::Hardware { line, edge }, mode)
    }

    /// Set the acquisition count
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Number of acquisitions this configuration produces, if bounded
    pub fn frames_expected(&self) -> Option<u32> {
        match self.mode {
            TriggerMode::Once => Some(1),
            TriggerMode::Multiple | TriggerMode::Start => self.count,
        }
    }
}

impl fmt::Display for TriggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.mode)?;
        if let Some(count) = self.count {
            write!(f, " x{}", count)?;
        }
        Ok(())
    }
}

/// Declared trigger capabilities of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSupport {
    pairs: BTreeSet<(SourceKind, TriggerMode)>,
    lines: BTreeSet<u8>,
}

impl TriggerSupport {
    /// A device that cannot be triggered
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a supported (source kind, mode) pair
    pub fn with(mut self, kind: SourceKind, mode: TriggerMode) -> Self {
        self.pairs.insert((kind, mode));
        self
    }

    /// Add every mode in `modes` for `kind`
    pub fn with_modes(mut self, kind: SourceKind, modes: &[TriggerMode]) -> Self {
        for mode in modes {
            self.pairs.insert((kind, *mode));
        }
        self
    }

    /// Declare the hardware lines wired to the device
    pub fn with_lines<I: IntoIterator<Item = u8>>(mut self, lines: I) -> Self {
        self.lines.extend(lines);
        self
    }

    /// Whether the pair is supported
    pub fn supports(&self, kind: SourceKind, mode: TriggerMode) -> bool {
        self.pairs.contains(&(kind, mode))
    }

    /// Whether `line` is wired to the device
    pub fn is_wired(&self, line: u8) -> bool {
        self.lines.contains(&line)
    }

    /// Supported pairs in a stable order
    pub fn pairs(&self) -> impl Iterator<Item = &(SourceKind, TriggerMode)> {
        self.pairs.iter()
    }

    /// Wired hardware lines in ascending order
    pub fn lines(&self) -> impl Iterator<Item = &u8> {
        self.lines.iter()
    }

    /// Whether the device accepts any trigger configuration at all
    pub fn is_triggerable(&self) -> bool {
        !self.pairs.is_empty()
    }
}

/// Why a trigger configuration was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerRejection {
    /// The (source, mode) pair is not supported
    #[error("{kind} trigger in {mode} mode is not supported")]
    UnsupportedPair {
        /// Requested source kind
        kind: SourceKind,
        /// Requested mode
        mode: TriggerMode,
    },

    /// The requested line is not wired to the device
    #[error("trigger line {0} is not wired to this device")]
    LineNotWired(u8),

    /// The acquisition count does not fit the mode
    #[error("invalid count: {0}")]
    InvalidCount(String),
}

/// Check a requested configuration against a device's declared support
pub fn validate(support: &TriggerSupport, config: &TriggerConfig) -> Result<(), TriggerRejection> {
    let kind = config.source.kind();
    if !support.supports(kind, config.mode) {
        return Err(TriggerRejection::UnsupportedPair {
            kind,
            mode: config.mode,
        });
    }

    if let Some(line) = config.source.line() {
        if !support.is_wired(line) {
            return Err(TriggerRejection::LineNotWired(line));
        }
    }

    match (config.mode, config.count) {
        (_, Some(0)) => Err(TriggerRejection::InvalidCount(
            "count must be at least 1".to_string(),
        )),
        (TriggerMode::Once, Some(n)) if n != 1 => Err(TriggerRejection::InvalidCount(format!(
            "once mode acquires exactly 1, got {}",
            n
        ))),
        _ => Ok(()),
    }
}

/// One pulse observed on a trigger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pulse {
    /// Line the pulse was emitted on
    pub line: u8,
    /// Per-line pulse counter, starting at 1
    pub seq: u64,
}

#[derive(Debug)]
struct LineInner {
    id: u8,
    sender: broadcast::Sender<Pulse>,
    emitted: AtomicU64,
}

/// Handle to a physical trigger line shared by several devices
///
/// Cloning the handle refers to the same line.
#[derive(Debug, Clone)]
pub struct TriggerLine {
    inner: Arc<LineInner>,
}

impl TriggerLine {
    /// Create a new line
    pub fn new(id: u8) -> Self {
        let (sender, _) = broadcast::channel(LINE_CAPACITY);
        Self {
            inner: Arc::new(LineInner {
                id,
                sender,
                emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Line number
    pub fn id(&self) -> u8 {
        self.inner.id
    }

    /// Listen for pulses emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Pulse> {
        self.inner.sender.subscribe()
    }

    /// Emit one pulse to every device currently listening on the line
    ///
    /// Returns the number of listeners that received it.
    pub fn pulse(&self) -> usize {
        let seq = self.inner.emitted.fetch_add(1, Ordering::SeqCst) + 1;
        let pulse = Pulse {
            line: self.inner.id,
            seq,
        };
        let listeners = self.inner.sender.send(pulse).unwrap_or(0);
        trace!("Pulse {} on line {} reached {} listeners", seq, self.inner.id, listeners);
        listeners
    }

    /// Number of pulses emitted so far
    pub fn pulses_emitted(&self) -> u64 {
        self.inner.emitted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_support() -> TriggerSupport {
        TriggerSupport::none()
            .with_modes(SourceKind::Software, &[TriggerMode::Once, TriggerMode::Multiple])
            .with_modes(
                SourceKind::Hardware(TriggerEdge::Rising),
                &[TriggerMode::Once, TriggerMode::Multiple, TriggerMode::Start],
            )
            .with_lines([0, 1])
    }

    #[test]
    fn test_supported_configurations() {
        let support = camera_support();
        assert!(validate(&support, &TriggerConfig::software_once()).is_ok());
        assert!(validate(
            &support,
            &TriggerConfig::hardware(1, TriggerEdge::Rising, TriggerMode::Start).with_count(10)
        )
        .is_ok());
    }

    #[test]
    fn test_unsupported_pair_is_rejected() {
        let support = camera_support();
        let err = validate(&support, &TriggerConfig::software(TriggerMode::Start)).unwrap_err();
        assert_eq!(
            err,
            TriggerRejection::UnsupportedPair {
                kind: SourceKind::Software,
                mode: TriggerMode::Start
            }
        );

        let falling = TriggerConfig::hardware(0, TriggerEdge::Falling, TriggerMode::Once);
        assert!(matches!(
            validate(&support, &falling),
            Err(TriggerRejection::UnsupportedPair { .. })
        ));
    }

    #[test]
    fn test_unwired_line_is_rejected() {
        let support = camera_support();
        let config = TriggerConfig::hardware(3, TriggerEdge::Rising, TriggerMode::Once);
        assert_eq!(
            validate(&support, &config),
            Err(TriggerRejection::LineNotWired(3))
        );
    }

    #[test]
    fn test_count_rules() {
        let support = camera_support();
        assert!(validate(&support, &TriggerConfig::software_once().with_count(1)).is_ok());
        assert!(matches!(
            validate(&support, &TriggerConfig::software_once().with_count(2)),
            Err(TriggerRejection::InvalidCount(_))
        ));
        assert!(matches!(
            validate(
                &support,
                &TriggerConfig::software(TriggerMode::Multiple).with_count(0)
            ),
            Err(TriggerRejection::InvalidCount(_))
        ));
    }

    #[test]
    fn test_untriggerable_device_rejects_everything() {
        let support = TriggerSupport::none();
        assert!(!support.is_triggerable());
        assert!(validate(&support, &TriggerConfig::software_once()).is_err());
    }

    #[test]
    fn test_config_display() {
        let config = TriggerConfig::hardware(2, TriggerEdge::Rising, TriggerMode::Multiple)
            .with_count(10);
        assert_eq!(config.to_string(), "line 2 rising/multiple x10");
        assert_eq!(TriggerConfig::software_once().to_string(), "software/once");
    }

    #[test]
    fn test_frames_expected() {
        assert_eq!(TriggerConfig::software_once().frames_expected(), Some(1));
        assert_eq!(
            TriggerConfig::software(TriggerMode::Multiple).frames_expected(),
            None
        );
        assert_eq!(
            TriggerConfig::software(TriggerMode::Multiple)
                .with_count(4)
                .frames_expected(),
            Some(4)
        );
    }

    #[test]
    fn test_config_serde() {
        let config = TriggerConfig::hardware(0, TriggerEdge::Pulse, TriggerMode::Once);
        let json = serde_json::to_string(&config).unwrap();
        let back: TriggerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[tokio::test]
    async fn test_line_broadcasts_to_all_listeners() {
        let line = TriggerLine::new(0);
        let mut a = line.subscribe();
        let mut b = line.clone().subscribe();

        assert_eq!(line.pulse(), 2);
        assert_eq!(a.recv().await.unwrap(), Pulse { line: 0, seq: 1 });
        assert_eq!(b.recv().await.unwrap().seq, 1);
        assert_eq!(line.pulses_emitted(), 1);
    }

    #[tokio::test]
    async fn test_pulse_without_listeners() {
        let line = TriggerLine::new(4);
        assert_eq!(line.pulse(), 0);
        let mut late = line.subscribe();
        assert!(late.try_recv().is_err());
    }
}
