//! Databroker data model types.
//!
//! These types represent the values exchanged with the broker:
//! - Typed data points and their declared data types
//! - Field selectors (value, actuator target, metadata)
//! - Data entries and entry updates as returned by reads and streams

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::path::SignalPath;

/// Which aspect of a signal is read, written or subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Field {
    /// The current value of the signal.
    Value,
    /// The requested target value of an actuator.
    ActuatorTarget,
    /// Static signal metadata.
    Metadata,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Value => "VALUE",
            Field::ActuatorTarget => "ACTUATOR_TARGET",
            Field::Metadata => "METADATA",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared data type of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    StringArray,
    BoolArray,
    Int32Array,
    Int64Array,
    Uint32Array,
    Uint64Array,
    FloatArray,
    DoubleArray,
}

impl DataType {
    /// The value a signal of this type holds before the broker reports one.
    pub fn default_value(&self) -> DataPoint {
        match self {
            DataType::String => DataPoint::String(String::new()),
            DataType::Bool => DataPoint::Bool(false),
            DataType::Int32 => DataPoint::Int32(0),
            DataType::Int64 => DataPoint::Int64(0),
            DataType::Uint32 => DataPoint::Uint32(0),
            DataType::Uint64 => DataPoint::Uint64(0),
            DataType::Float => DataPoint::Float(0.0),
            DataType::Double => DataPoint::Double(0.0),
            DataType::StringArray => DataPoint::StringArray(Vec::new()),
            DataType::BoolArray => DataPoint::BoolArray(Vec::new()),
            DataType::Int32Array => DataPoint::Int32Array(Vec::new()),
            DataType::Int64Array => DataPoint::Int64Array(Vec::new()),
            DataType::Uint32Array => DataPoint::Uint32Array(Vec::new()),
            DataType::Uint64Array => DataPoint::Uint64Array(Vec::new()),
            DataType::FloatArray => DataPoint::FloatArray(Vec::new()),
            DataType::DoubleArray => DataPoint::DoubleArray(Vec::new()),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            DataType::StringArray
                | DataType::BoolArray
                | DataType::Int32Array
                | DataType::Int64Array
                | DataType::Uint32Array
                | DataType::Uint64Array
                | DataType::FloatArray
                | DataType::DoubleArray
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Bool => "boolean",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::StringArray => "string[]",
            DataType::BoolArray => "boolean[]",
            DataType::Int32Array => "int32[]",
            DataType::Int64Array => "int64[]",
            DataType::Uint32Array => "uint32[]",
            DataType::Uint64Array => "uint64[]",
            DataType::FloatArray => "float[]",
            DataType::DoubleArray => "double[]",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses VSS datatype names. Narrow integer types widen to the 32 bit variant.
impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data_type = match s {
            "string" => DataType::String,
            "boolean" | "bool" => DataType::Bool,
            "int8" | "int16" | "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" | "uint16" | "uint32" => DataType::Uint32,
            "uint64" => DataType::Uint64,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "string[]" => DataType::StringArray,
            "boolean[]" | "bool[]" => DataType::BoolArray,
            "int8[]" | "int16[]" | "int32[]" => DataType::Int32Array,
            "int64[]" => DataType::Int64Array,
            "uint8[]" | "uint16[]" | "uint32[]" => DataType::Uint32Array,
            "uint64[]" => DataType::Uint64Array,
            "float[]" => DataType::FloatArray,
            "double[]" => DataType::DoubleArray,
            other => return Err(UnknownDataType(other.to_string())),
        };
        Ok(data_type)
    }
}

/// A data type name that is not part of the supported set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown data type: {0}")]
pub struct UnknownDataType(pub String);

/// A typed signal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataPoint {
    /// The broker has no value for this signal yet.
    NotSet,
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    StringArray(Vec<String>),
    BoolArray(Vec<bool>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    Uint32Array(Vec<u32>),
    Uint64Array(Vec<u64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
}

impl DataPoint {
    /// The tag of this value, None for [`DataPoint::NotSet`].
    pub fn data_type(&self) -> Option<DataType> {
        let data_type = match self {
            DataPoint::NotSet => return None,
            DataPoint::String(_) => DataType::String,
            DataPoint::Bool(_) => DataType::Bool,
            DataPoint::Int32(_) => DataType::Int32,
            DataPoint::Int64(_) => DataType::Int64,
            DataPoint::Uint32(_) => DataType::Uint32,
            DataPoint::Uint64(_) => DataType::Uint64,
            DataPoint::Float(_) => DataType::Float,
            DataPoint::Double(_) => DataType::Double,
            DataPoint::StringArray(_) => DataType::StringArray,
            DataPoint::BoolArray(_) => DataType::BoolArray,
            DataPoint::Int32Array(_) => DataType::Int32Array,
            DataPoint::Int64Array(_) => DataType::Int64Array,
            DataPoint::Uint32Array(_) => DataType::Uint32Array,
            DataPoint::Uint64Array(_) => DataType::Uint64Array,
            DataPoint::FloatArray(_) => DataType::FloatArray,
            DataPoint::DoubleArray(_) => DataType::DoubleArray,
        };
        Some(data_type)
    }

    /// Check whether this value may be stored in a signal of `data_type`.
    pub fn matches(&self, data_type: DataType) -> bool {
        self.data_type() == Some(data_type)
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, DataPoint::NotSet)
    }
}

impl std::fmt::Display for DataPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join<T: std::fmt::Display>(values: &[T]) -> String {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }

        match self {
            DataPoint::NotSet => write!(f, "<not set>"),
            DataPoint::String(v) => write!(f, "{v}"),
            DataPoint::Bool(v) => write!(f, "{v}"),
            DataPoint::Int32(v) => write!(f, "{v}"),
            DataPoint::Int64(v) => write!(f, "{v}"),
            DataPoint::Uint32(v) => write!(f, "{v}"),
            DataPoint::Uint64(v) => write!(f, "{v}"),
            DataPoint::Float(v) => write!(f, "{v}"),
            DataPoint::Double(v) => write!(f, "{v}"),
            DataPoint::StringArray(v) => write!(f, "[{}]", v.join(",")),
            DataPoint::BoolArray(v) => write!(f, "[{}]", join(v)),
            DataPoint::Int32Array(v) => write!(f, "[{}]", join(v)),
            DataPoint::Int64Array(v) => write!(f, "[{}]", join(v)),
            DataPoint::Uint32Array(v) => write!(f, "[{}]", join(v)),
            DataPoint::Uint64Array(v) => write!(f, "[{}]", join(v)),
            DataPoint::FloatArray(v) => write!(f, "[{}]", join(v)),
            DataPoint::DoubleArray(v) => write!(f, "[{}]", join(v)),
        }
    }
}

/// Kind of signal: measured, controllable or static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Sensor,
    Actuator,
    Attribute,
}

/// Metadata describing a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Declared value type
    pub data_type: DataType,

    /// Sensor, actuator or attribute
    pub entry_type: EntryType,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Unit string (e.g., "km/h", "celsius")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Metadata {
    pub fn new(data_type: DataType, entry_type: EntryType) -> Self {
        Self {
            data_type,
            entry_type,
            description: None,
            unit: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// The state of one signal as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntry {
    /// The signal path (e.g., "Vehicle.Speed")
    pub path: SignalPath,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DataPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuator_target: Option<DataPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Time of the last change (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DataEntry {
    /// An entry carrying no fields.
    pub fn new(path: SignalPath) -> Self {
        Self {
            path,
            value: None,
            actuator_target: None,
            metadata: None,
            timestamp: None,
        }
    }

    /// Set the data point carried for `field`. Ignored for [`Field::Metadata`].
    pub fn with_datapoint(mut self, field: Field, datapoint: DataPoint) -> Self {
        match field {
            Field::Value => self.value = Some(datapoint),
            Field::ActuatorTarget => self.actuator_target = Some(datapoint),
            Field::Metadata => {}
        }
        self
    }

    /// The data point carried for `field`, if any.
    pub fn datapoint(&self, field: Field) -> Option<&DataPoint> {
        match field {
            Field::Value => self.value.as_ref(),
            Field::ActuatorTarget => self.actuator_target.as_ref(),
            Field::Metadata => None,
        }
    }
}

/// One changed entry together with the fields that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub entry: DataEntry,
    pub fields: Vec<Field>,
}

impl EntryUpdate {
    pub fn new(entry: DataEntry, fields: Vec<Field>) -> Self {
        Self { entry, fields }
    }
}
