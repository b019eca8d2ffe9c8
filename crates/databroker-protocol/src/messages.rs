//! Protocol message types exchanged with the broker.
//!
//! This module defines the request/response envelopes of the three call shapes:
//! - Read: EntryRequest list → entries plus per-entry errors
//! - Write: EntryUpdate list → per-entry errors
//! - Subscribe: SubscribeEntry list → stream of SubscribeResponse batches
//!
//! Application errors (unknown path, type mismatch) travel as data inside the
//! responses. Transport failures are reported separately as `TransportError`.

use serde::{Deserialize, Serialize};
use databroker_core::{DataEntry, DataPoint, EntryUpdate, Field, SignalPath, StoreError};

/// One path and the fields requested for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub path: SignalPath,
    pub fields: Vec<Field>,
}

/// Point read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub entries: Vec<EntryRequest>,
}

impl ReadRequest {
    /// Read `fields` of `path` and, for a branch, of all its descendants.
    pub fn single(path: SignalPath, fields: &[Field]) -> Self {
        Self {
            entries: vec![EntryRequest {
                path,
                fields: dedup_fields(fields),
            }],
        }
    }
}

/// Point read response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub entries: Vec<DataEntry>,
    #[serde(default)]
    pub errors: Vec<DataEntryError>,
}

/// Point write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub updates: Vec<EntryUpdate>,
}

impl WriteRequest {
    /// One independent update per field, all carrying `datapoint`.
    pub fn for_fields(path: &SignalPath, fields: &[Field], datapoint: &DataPoint) -> Self {
        let updates = dedup_fields(fields)
            .into_iter()
            .map(|field| {
                let entry = DataEntry::new(path.clone()).with_datapoint(field, datapoint.clone());
                EntryUpdate::new(entry, vec![field])
            })
            .collect();

        Self { updates }
    }
}

/// Point write response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub errors: Vec<DataEntryError>,
}

impl WriteResponse {
    /// True if every update was accepted.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One path and the field to stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeEntry {
    pub path: SignalPath,
    pub fields: Vec<Field>,
}

/// Stream subscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: Vec<SubscribeEntry>,
}

impl SubscribeRequest {
    pub fn single(path: SignalPath, field: Field) -> Self {
        Self {
            subscribe: vec![SubscribeEntry {
                path,
                fields: vec![field],
            }],
        }
    }
}

/// One server push: a batch of changed entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub updates: Vec<EntryUpdate>,
}

/// An application error attributed to one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntryError {
    pub path: SignalPath,
    pub error: ErrorDetail,
}

/// Error details in HTTP status style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub reason: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl From<&StoreError> for ErrorDetail {
    fn from(err: &StoreError) -> Self {
        let (code, reason) = match err {
            StoreError::NotFound(_) => (404, "not_found"),
            StoreError::TypeMismatch { .. } => (400, "type_mismatch"),
            StoreError::NotAnActuator(_) => (400, "not_an_actuator"),
            StoreError::ReadOnly(..) => (400, "read_only"),
        };
        ErrorDetail::new(code, reason, err.to_string())
    }
}

impl DataEntryError {
    pub fn from_store_error(path: SignalPath, err: &StoreError) -> Self {
        Self {
            path,
            error: ErrorDetail::from(err),
        }
    }
}

fn dedup_fields(fields: &[Field]) -> Vec<Field> {
    let mut unique = Vec::with_capacity(fields.len());
    for field in fields {
        if !unique.contains(field) {
            unique.push(*field);
        }
    }
    unique
}
