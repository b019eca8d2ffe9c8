//! # databroker-core
//!
//! Core data model for talking to a signal databroker.
//!
//! This crate provides:
//! - Value types (DataPoint, DataType, Field, DataEntry, etc.)
//! - Signal path parsing
//! - Signal trees with immutable replace-by-path updates
//! - In-memory signal store implementation
//! - Connector configuration
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod model;
pub mod node;
pub mod path;
pub mod store;

pub use config::{ConfigError, ConnectorConfig};
pub use model::*;
pub use node::{Branch, Leaf, SignalNode, TreeError};
pub use path::{PathError, SignalPath};
pub use store::{MemoryStore, SignalStore, StoreError};
