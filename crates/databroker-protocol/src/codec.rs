//! Value parsing for the broker protocol.
//!
//! Converts user supplied text into typed data points. Conversion is strict:
//! text that does not parse as the declared type is an error, never a silent
//! fallback.

use databroker_core::{DataPoint, DataType};
use std::str::FromStr;
use thiserror::Error;

const ARRAY_DELIMITER: char = ',';

/// Errors that can occur during value parsing.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Text could not be converted to the requested type.
    #[error("Cannot convert '{value}' to {data_type}")]
    InvalidValue { data_type: DataType, value: String },
}

/// Parse `value` as a data point of `data_type`.
///
/// Array types take comma separated elements, e.g. "1,2,3".
pub fn parse_datapoint(data_type: DataType, value: &str) -> Result<DataPoint, CodecError> {
    let invalid = || CodecError::InvalidValue {
        data_type,
        value: value.to_string(),
    };

    let datapoint = match data_type {
        DataType::String => DataPoint::String(value.to_string()),
        DataType::Bool => DataPoint::Bool(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Int32 => DataPoint::Int32(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Int64 => DataPoint::Int64(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Uint32 => DataPoint::Uint32(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Uint64 => DataPoint::Uint64(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Float => DataPoint::Float(parse_scalar(value).ok_or_else(invalid)?),
        DataType::Double => DataPoint::Double(parse_scalar(value).ok_or_else(invalid)?),
        DataType::StringArray => DataPoint::StringArray(
            split_array(value).map(|s| s.to_string()).collect(),
        ),
        DataType::BoolArray => DataPoint::BoolArray(parse_array(value).ok_or_else(invalid)?),
        DataType::Int32Array => DataPoint::Int32Array(parse_array(value).ok_or_else(invalid)?),
        DataType::Int64Array => DataPoint::Int64Array(parse_array(value).ok_or_else(invalid)?),
        DataType::Uint32Array => DataPoint::Uint32Array(parse_array(value).ok_or_else(invalid)?),
        DataType::Uint64Array => DataPoint::Uint64Array(parse_array(value).ok_or_else(invalid)?),
        DataType::FloatArray => DataPoint::FloatArray(parse_array(value).ok_or_else(invalid)?),
        DataType::DoubleArray => DataPoint::DoubleArray(parse_array(value).ok_or_else(invalid)?),
    };

    Ok(datapoint)
}

fn parse_scalar<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

fn split_array(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(ARRAY_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_array<T: FromStr>(value: &str) -> Option<Vec<T>> {
    split_array(value).map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse_datapoint(DataType::Uint32, "72").unwrap(),
            DataPoint::Uint32(72)
        );
        assert_eq!(
            parse_datapoint(DataType::Bool, "true").unwrap(),
            DataPoint::Bool(true)
        );
        assert_eq!(
            parse_datapoint(DataType::Double, " 3.5 ").unwrap(),
            DataPoint::Double(3.5)
        );
        assert_eq!(
            parse_datapoint(DataType::String, "hello").unwrap(),
            DataPoint::String("hello".to_string())
        );
    }

    #[test]
    fn test_parse_arrays() {
        assert_eq!(
            parse_datapoint(DataType::Int32Array, "1, -2,3").unwrap(),
            DataPoint::Int32Array(vec![1, -2, 3])
        );
        assert_eq!(
            parse_datapoint(DataType::StringArray, "a,b").unwrap(),
            DataPoint::StringArray(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_datapoint(DataType::BoolArray, "").unwrap(),
            DataPoint::BoolArray(vec![])
        );
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(matches!(
            parse_datapoint(DataType::Uint32, "-1"),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_datapoint(DataType::Bool, "yes"),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_datapoint(DataType::FloatArray, "1.0,abc"),
            Err(CodecError::InvalidValue { .. })
        ));
    }
}
