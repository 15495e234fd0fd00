/*!
 * Typed, validated device settings.
 *
 * Every setting is declared once when the device is built, with a kind that
 * carries its type and constraints and an optional validator. Values are
 * normalized to the declared type before they are validated; a rejected value
 * is never committed.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use scopeflow_core::types::Value;

/// Custom validation run after type and range checks
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Type and constraints of a setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SettingKind {
    /// Integer within an inclusive range
    IntRange {
        /// Minimum value
        min: i64,
        /// Maximum value
        max: i64,
    },
    /// Float within an inclusive range
    FloatRange {
        /// Minimum value
        min: f64,
        /// Maximum value
        max: f64,
    },
    /// One of a fixed set of labels
    Enum {
        /// Allowed labels, index order matters
        labels: Vec<String>,
    },
    /// Boolean flag
    Bool,
    /// Free text with an optional maximum length
    String {
        /// Maximum length in characters
        max_len: Option<usize>,
    },
    /// Fixed-length tuple reported by the device; never writable
    ReadOnlyTuple {
        /// Number of elements
        len: usize,
    },
}

impl SettingKind {
    /// Enum kind from a list of labels
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SettingKind::Enum {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Type tag used in setting descriptions
    pub fn type_tag(&self) -> &'static str {
        match self {
            SettingKind::IntRange { .. } => "int-range",
            SettingKind::FloatRange { .. } => "float-range",
            SettingKind::Enum { .. } => "enum",
            SettingKind::Bool => "bool",
            SettingKind::String { .. } => "string",
            SettingKind::ReadOnlyTuple { .. } => "readonly-tuple",
        }
    }

    /// Whether the kind itself forbids writes
    pub fn is_readonly(&self) -> bool {
        matches!(self, SettingKind::ReadOnlyTuple { .. })
    }

    /// Check `value` against the kind and convert it to the canonical representation
    ///
    /// Integers are accepted for float settings. Enum settings accept a label
    /// or an index and always store the label.
    pub fn normalize(&self, value: &Value) -> std::result::Result<Value, String> {
        match self {
            SettingKind::IntRange { min, max } => {
                let v = value
                    .as_integer()
                    .ok_or_else(|| format!("expected integer, got {}", value.type_name()))?;
                if v < *min || v > *max {
                    return Err(format!("{} is outside [{}, {}]", v, min, max));
                }
                Ok(Value::Integer(v))
            }
            SettingKind::FloatRange { min, max } => {
                let v = value
                    .as_float()
                    .ok_or_else(|| format!("expected number, got {}", value.type_name()))?;
                if !v.is_finite() {
                    return Err(format!("{} is not a finite number", v));
                }
                if v < *min || v > *max {
                    return Err(format!("{} is outside [{}, {}]", v, min, max));
                }
                Ok(Value::Float(v))
            }
            SettingKind::Enum { labels } => match value {
                Value::String(label) => {
                    if labels.iter().any(|l| l == label) {
                        Ok(Value::String(label.clone()))
                    } else {
                        Err(format!("'{}' is not one of {:?}", label, labels))
                    }
                }
                Value::Integer(index) => usize::try_from(*index)
                    .ok()
                    .and_then(|i| labels.get(i))
                    .map(|label| Value::String(label.clone()))
                    .ok_or_else(|| {
                        format!("index {} is outside 0..{}", index, labels.len())
                    }),
                other => Err(format!("expected label or index, got {}", other.type_name())),
            },
            SettingKind::Bool => value
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("expected bool, got {}", value.type_name())),
            SettingKind::String { max_len } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected string, got {}", value.type_name()))?;
                match max_len {
                    Some(max) if s.chars().count() > *max => {
                        Err(format!("length {} exceeds {}", s.chars().count(), max))
                    }
                    _ => Ok(Value::String(s.to_string())),
                }
            }
            SettingKind::ReadOnlyTuple { len } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected tuple, got {}", value.type_name()))?;
                if items.len() != *len {
                    return Err(format!("expected {} elements, got {}", len, items.len()));
                }
                Ok(value.clone())
            }
        }
    }
}

/// Errors raised by the settings registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingError {
    /// No setting with this name
    #[error("unknown setting '{0}'")]
    Unknown(String),

    /// The setting is read-only
    #[error("setting '{0}' is read-only")]
    Immutable(String),

    /// The value failed type, range or custom validation
    #[error("invalid value for '{name}': {reason}")]
    Rejected {
        /// Setting name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A setting with this name was already declared
    #[error("setting '{0}' is already declared")]
    Duplicate(String),
}

/// Declaration of one setting, built fluently and passed to `SettingsRegistry::declare`
#[derive(Clone)]
pub struct SettingSpec {
    name: String,
    kind: SettingKind,
    initial: Value,
    validator: Option<Validator>,
    readonly: bool,
}

impl SettingSpec {
    /// Start a declaration
    pub fn new<S: Into<String>>(name: S, kind: SettingKind, initial: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            initial: initial.into(),
            validator: None,
            readonly: false,
        }
    }

    /// Integer setting within `[min, max]`
    pub fn int_range<S: Into<String>>(name: S, min: i64, max: i64, initial: i64) -> Self {
        Self::new(name, SettingKind::IntRange { min, max }, initial)
    }

    /// Float setting within `[min, max]`
    pub fn float_range<S: Into<String>>(name: S, min: f64, max: f64, initial: f64) -> Self {
        Self::new(name, SettingKind::FloatRange { min, max }, initial)
    }

    /// Enum setting over `labels`
    pub fn enumeration<S, I, L>(name: S, labels: I, initial: &str) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self::new(name, SettingKind::labels(labels), initial)
    }

    /// Boolean setting
    pub fn boolean<S: Into<String>>(name: S, initial: bool) -> Self {
        Self::new(name, SettingKind::Bool, initial)
    }

    /// String setting
    pub fn string<S: Into<String>>(name: S, max_len: Option<usize>, initial: &str) -> Self {
        Self::new(name, SettingKind::String { max_len }, initial)
    }

    /// Read-only tuple reported by the device
    pub fn readonly_tuple<S: Into<String>>(name: S, values: Vec<Value>) -> Self {
        let len = values.len();
        Self::new(name, SettingKind::ReadOnlyTuple { len }, Value::Array(values))
    }

    /// Attach a custom validator
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Mark the setting as read-only
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }
}

impl fmt::Debug for SettingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("initial", &self.initial)
            .field("readonly", &self.readonly)
            .finish()
    }
}

/// Handle to a declared setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingHandle {
    index: usize,
    name: String,
}

impl SettingHandle {
    /// Setting name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A validated value waiting to be committed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    index: usize,
    name: String,
    value: Value,
}

impl PendingChange {
    /// Setting name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized value that will be committed
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Description of a setting as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDescription {
    /// Setting name
    pub name: String,
    /// Type tag (`int-range`, `float-range`, `enum`, `bool`, `string`, `readonly-tuple`)
    pub type_tag: String,
    /// Kind with its constraints
    pub constraints: SettingKind,
    /// Current value
    pub value: Value,
    /// Whether the setting can be written
    pub readonly: bool,
}

struct Setting {
    name: String,
    kind: SettingKind,
    value: Value,
    validator: Option<Validator>,
    readonly: bool,
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("readonly", &self.readonly)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// Ordered collection of the settings of one device
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    settings: Vec<Setting>,
    index: HashMap<String, usize>,
}

impl SettingsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a setting
    ///
    /// The initial value goes through the same normalization and validation as
    /// any later write.
    pub fn declare(&mut self, spec: SettingSpec) -> Result<SettingHandle, SettingError> {
        if self.index.contains_key(&spec.name) {
            return Err(SettingError::Duplicate(spec.name));
        }

        let value = Self::check(&spec.name, &spec.kind, spec.validator.as_ref(), &spec.initial)?;
        let index = self.settings.len();
        let readonly = spec.readonly || spec.kind.is_readonly();

        self.index.insert(spec.name.clone(), index);
        self.settings.push(Setting {
            name: spec.name.clone(),
            kind: spec.kind,
            value,
            validator: spec.validator,
            readonly,
        });

        Ok(SettingHandle {
            index,
            name: spec.name,
        })
    }

    /// Declare every setting in `specs`, stopping at the first failure
    pub fn declare_all<I>(&mut self, specs: I) -> Result<Vec<SettingHandle>, SettingError>
    where
        I: IntoIterator<Item = SettingSpec>,
    {
        specs.into_iter().map(|spec| self.declare(spec)).collect()
    }

    fn check(
        name: &str,
        kind: &SettingKind,
        validator: Option<&Validator>,
        value: &Value,
    ) -> Result<Value, SettingError> {
        let normalized = kind.normalize(value).map_err(|reason| SettingError::Rejected {
            name: name.to_string(),
            reason,
        })?;

        if let Some(validator) = validator {
            validator(&normalized).map_err(|reason| SettingError::Rejected {
                name: name.to_string(),
                reason,
            })?;
        }

        Ok(normalized)
    }

    fn lookup(&self, name: &str) -> Result<(usize, &Setting), SettingError> {
        self.index
            .get(name)
            .map(|&i| (i, &self.settings[i]))
            .ok_or_else(|| SettingError::Unknown(name.to_string()))
    }

    /// Handle for a declared setting
    pub fn handle(&self, name: &str) -> Option<SettingHandle> {
        self.index.get(name).map(|&index| SettingHandle {
            index,
            name: name.to_string(),
        })
    }

    /// Current value of the setting behind `handle`
    pub fn value(&self, handle: &SettingHandle) -> &Value {
        &self.settings[handle.index].value
    }

    /// Current value of a setting
    pub fn get(&self, name: &str) -> Result<Value, SettingError> {
        self.lookup(name).map(|(_, s)| s.value.clone())
    }

    /// All settings as (name, value) pairs in declaration order
    pub fn get_all(&self) -> Vec<(String, Value)> {
        self.settings
            .iter()
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }

    /// Writable settings as (name, value) pairs in declaration order
    pub fn writable(&self) -> Vec<(String, Value)> {
        self.settings
            .iter()
            .filter(|s| !s.readonly)
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }

    /// Check a write without committing it
    pub fn prepare(&self, name: &str, value: &Value) -> Result<PendingChange, SettingError> {
        let (index, setting) = self.lookup(name)?;
        if setting.readonly {
            return Err(SettingError::Immutable(name.to_string()));
        }

        let value = Self::check(name, &setting.kind, setting.validator.as_ref(), value)?;
        Ok(PendingChange {
            index,
            name: name.to_string(),
            value,
        })
    }

    /// Commit a prepared change, returning the previous value
    pub fn commit(&mut self, change: PendingChange) -> Value {
        let setting = &mut self.settings[change.index];
        trace!("{}: {} -> {}", setting.name, setting.value, change.value);
        std::mem::replace(&mut setting.value, change.value)
    }

    /// Validate and commit a value, returning the previous value
    pub fn set(&mut self, name: &str, value: &Value) -> Result<Value, SettingError> {
        let change = self.prepare(name, value)?;
        Ok(self.commit(change))
    }

    /// Describe every setting in declaration order
    pub fn describe(&self) -> Vec<SettingDescription> {
        self.settings
            .iter()
            .map(|s| SettingDescription {
                name: s.name.clone(),
                type_tag: s.kind.type_tag().to_string(),
                constraints: s.kind.clone(),
                value: s.value.clone(),
                readonly: s.readonly,
            })
            .collect()
    }

    /// Whether a setting with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of declared settings
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Whether no settings are declared
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SettingsRegistry {
        let mut registry = SettingsRegistry::new();
        registry
            .declare_all([
                SettingSpec::float_range("exposure_time", 0.001, 10.0, 0.1),
                SettingSpec::int_range("gain", 0, 100, 1)
                    .validator(|v| match v.as_integer() {
                        Some(g) if g % 2 == 1 || g == 0 => Ok(()),
                        _ => Err("gain must be odd or zero".to_string()),
                    }),
                SettingSpec::enumeration("binning", ["1x1", "2x2", "4x4"], "1x1"),
                SettingSpec::boolean("cooler", false),
                SettingSpec::string("label", Some(8), "scope"),
                SettingSpec::readonly_tuple(
                    "sensor_shape",
                    vec![Value::Integer(512), Value::Integer(512)],
                ),
                SettingSpec::int_range("temperature", -40, 40, 20).readonly(),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn test_declared_order_is_kept() {
        let registry = registry();
        let names: Vec<String> = registry.get_all().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "exposure_time",
                "gain",
                "binning",
                "cooler",
                "label",
                "sensor_shape",
                "temperature"
            ]
        );
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let mut registry = registry();
        let err = registry
            .declare(SettingSpec::boolean("cooler", true))
            .unwrap_err();
        assert_eq!(err, SettingError::Duplicate("cooler".to_string()));
    }

    #[test]
    fn test_invalid_initial_value_fails() {
        let mut registry = SettingsRegistry::new();
        let err = registry
            .declare(SettingSpec::int_range("gain", 0, 10, 50))
            .unwrap_err();
        assert!(matches!(err, SettingError::Rejected { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_returns_previous_value() {
        let mut registry = registry();
        let previous = registry.set("exposure_time", &Value::Float(0.5)).unwrap();
        assert_eq!(previous, Value::Float(0.1));
        assert_eq!(registry.get("exposure_time").unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_integer_accepted_for_float() {
        let mut registry = registry();
        registry.set("exposure_time", &Value::Integer(2)).unwrap();
        assert_eq!(registry.get("exposure_time").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_rejected_value_keeps_previous() {
        let mut registry = registry();
        for bad in [
            Value::Float(20.0),
            Value::String("fast".to_string()),
            Value::Float(f64::NAN),
        ] {
            assert!(registry.set("exposure_time", &bad).is_err());
            assert_eq!(registry.get("exposure_time").unwrap(), Value::Float(0.1));
        }
    }

    #[test]
    fn test_validator_runs_after_range_check() {
        let mut registry = registry();
        let err = registry.set("gain", &Value::Integer(4)).unwrap_err();
        assert_eq!(
            err,
            SettingError::Rejected {
                name: "gain".to_string(),
                reason: "gain must be odd or zero".to_string()
            }
        );
        assert_eq!(registry.get("gain").unwrap(), Value::Integer(1));
        registry.set("gain", &Value::Integer(5)).unwrap();
    }

    #[test]
    fn test_enum_accepts_label_or_index() {
        let mut registry = registry();
        registry.set("binning", &Value::Integer(2)).unwrap();
        assert_eq!(registry.get("binning").unwrap(), Value::from("4x4"));
        registry.set("binning", &Value::from("2x2")).unwrap();
        assert_eq!(registry.get("binning").unwrap(), Value::from("2x2"));
        assert!(registry.set("binning", &Value::Integer(3)).is_err());
        assert!(registry.set("binning", &Value::Integer(-1)).is_err());
        assert!(registry.set("binning", &Value::from("3x3")).is_err());
    }

    #[test]
    fn test_string_length_limit() {
        let mut registry = registry();
        assert!(registry.set("label", &Value::from("too long label")).is_err());
        registry.set("label", &Value::from("tirf")).unwrap();
    }

    #[test]
    fn test_readonly_settings() {
        let mut registry = registry();
        let shape = Value::Array(vec![Value::Integer(1), Value::Integer(1)]);
        assert_eq!(
            registry.set("sensor_shape", &shape).unwrap_err(),
            SettingError::Immutable("sensor_shape".to_string())
        );
        assert_eq!(
            registry.set("temperature", &Value::Integer(0)).unwrap_err(),
            SettingError::Immutable("temperature".to_string())
        );
        assert_eq!(registry.writable().len(), 5);
    }

    #[test]
    fn test_unknown_setting() {
        let mut registry = registry();
        assert_eq!(
            registry.get("offset").unwrap_err(),
            SettingError::Unknown("offset".to_string())
        );
        assert!(matches!(
            registry.set("offset", &Value::Integer(1)),
            Err(SettingError::Unknown(_))
        ));
    }

    #[test]
    fn test_prepare_does_not_commit() {
        let registry = registry();
        let change = registry.prepare("cooler", &Value::Bool(true)).unwrap();
        assert_eq!(change.value(), &Value::Bool(true));
        assert_eq!(registry.get("cooler").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_handles() {
        let mut registry = registry();
        let handle = registry.handle("gain").unwrap();
        assert_eq!(handle.name(), "gain");
        registry.set("gain", &Value::Integer(7)).unwrap();
        assert_eq!(registry.value(&handle), &Value::Integer(7));
        assert!(registry.handle("offset").is_none());
    }

    #[test]
    fn test_describe_reflects_last_committed_value() {
        let mut registry = registry();
        for gain in [3, 5, 9] {
            registry.set("gain", &Value::Integer(gain)).unwrap();
        }
        let _ = registry.set("gain", &Value::Integer(200));

        let description = registry.describe();
        let gain = description.iter().find(|d| d.name == "gain").unwrap();
        assert_eq!(gain.value, Value::Integer(9));
        assert_eq!(gain.type_tag, "int-range");
        assert_eq!(gain.constraints, SettingKind::IntRange { min: 0, max: 100 });
        assert!(!gain.readonly);

        let shape = description.iter().find(|d| d.name == "sensor_shape").unwrap();
        assert_eq!(shape.type_tag, "readonly-tuple");
        assert!(shape.readonly);
    }

    #[test]
    fn test_description_serializes() {
        let registry = registry();
        let json = serde_json::to_value(registry.describe()).unwrap();
        assert_eq!(json[2]["name"], "binning");
        assert_eq!(json[2]["constraints"]["type"], "enum");
        assert_eq!(json[2]["value"], "1x1");
    }
}
