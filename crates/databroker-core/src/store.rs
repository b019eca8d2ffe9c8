//! Signal data store.
//!
//! The store maintains the declared signals of a broker together with their
//! current values and provides methods for querying and updating them.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{DataEntry, DataPoint, DataType, EntryType, Field, Metadata};
use crate::node::SignalNode;
use crate::path::SignalPath;

/// Trait for signal storage implementations.
pub trait SignalStore: Send + Sync {
    /// Declare a signal, replacing any earlier declaration and value.
    fn declare(&mut self, path: SignalPath, metadata: Metadata);

    /// Get the requested fields of every signal at or below `path`.
    fn get(&self, path: &SignalPath, fields: &[Field]) -> Result<Vec<DataEntry>, StoreError>;

    /// Set one field of the signal at `path`, returning the changed entry.
    fn set(
        &mut self,
        path: &SignalPath,
        field: Field,
        value: DataPoint,
    ) -> Result<DataEntry, StoreError>;

    /// Get the metadata of the signal at `path`.
    fn metadata(&self, path: &SignalPath) -> Option<&Metadata>;

    /// Get the number of declared signals.
    fn signal_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct StoredSignal {
    metadata: Metadata,
    value: Option<DataPoint>,
    actuator_target: Option<DataPoint>,
    timestamp: Option<DateTime<Utc>>,
}

impl StoredSignal {
    fn entry(&self, path: &SignalPath, fields: &[Field]) -> DataEntry {
        let mut entry = DataEntry::new(path.clone());
        for field in fields {
            match field {
                Field::Value => {
                    entry.value = Some(self.value.clone().unwrap_or(DataPoint::NotSet));
                }
                Field::ActuatorTarget => {
                    entry.actuator_target =
                        Some(self.actuator_target.clone().unwrap_or(DataPoint::NotSet));
                }
                Field::Metadata => entry.metadata = Some(self.metadata.clone()),
            }
        }
        entry.timestamp = self.timestamp;
        entry
    }
}

/// In-memory signal store implementation.
///
/// Signals are kept in path order so that a branch read returns its
/// descendants in a stable order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    signals: BTreeMap<SignalPath, StoredSignal>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every leaf of `node` using the leaf's type information.
    ///
    /// Leaf values are not stored; the broker starts with no values.
    pub fn declare_tree(&mut self, node: &SignalNode) {
        for leaf in node.leaves() {
            let mut metadata = Metadata::new(leaf.data_type, leaf.entry_type);
            metadata.description = leaf.description.clone();
            self.declare(leaf.path.clone(), metadata);
        }
    }
}

impl SignalStore for MemoryStore {
    fn declare(&mut self, path: SignalPath, metadata: Metadata) {
        self.signals.insert(
            path,
            StoredSignal {
                metadata,
                value: None,
                actuator_target: None,
                timestamp: None,
            },
        );
    }

    fn get(&self, path: &SignalPath, fields: &[Field]) -> Result<Vec<DataEntry>, StoreError> {
        let entries: Vec<DataEntry> = self
            .signals
            .iter()
            .filter(|(signal_path, _)| signal_path.starts_with(path))
            .map(|(signal_path, signal)| signal.entry(signal_path, fields))
            .collect();

        if entries.is_empty() {
            return Err(StoreError::NotFound(path.clone()));
        }
        Ok(entries)
    }

    fn set(
        &mut self,
        path: &SignalPath,
        field: Field,
        value: DataPoint,
    ) -> Result<DataEntry, StoreError> {
        let signal = self
            .signals
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;

        let expected = signal.metadata.data_type;
        if !value.matches(expected) {
            return Err(StoreError::TypeMismatch {
                path: path.clone(),
                expected,
                actual: value.data_type(),
            });
        }

        match field {
            Field::Value => signal.value = Some(value),
            Field::ActuatorTarget => {
                if signal.metadata.entry_type != EntryType::Actuator {
                    return Err(StoreError::NotAnActuator(path.clone()));
                }
                signal.actuator_target = Some(value);
            }
            Field::Metadata => return Err(StoreError::ReadOnly(path.clone(), field)),
        }
        signal.timestamp = Some(Utc::now());

        Ok(signal.entry(path, &[field]))
    }

    fn metadata(&self, path: &SignalPath) -> Option<&Metadata> {
        self.signals.get(path).map(|signal| &signal.metadata)
    }

    fn signal_count(&self) -> usize {
        self.signals.len()
    }
}

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Signal not found: {0}")]
    NotFound(SignalPath),

    #[error("Type mismatch at {path}: expected {expected}, got {actual:?}")]
    TypeMismatch {
        path: SignalPath,
        expected: DataType,
        actual: Option<DataType>,
    },

    #[error("Signal {0} is not an actuator")]
    NotAnActuator(SignalPath),

    #[error("Field {1} of {0} is read-only")]
    ReadOnly(SignalPath, Field),
}
