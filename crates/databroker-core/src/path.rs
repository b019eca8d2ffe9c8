//! Signal path parsing.
//!
//! Signal paths are dot-separated strings like "Vehicle.Driver.HeartRate".
//! A path uniquely identifies one position in the broker's signal tree,
//! either a branch or a leaf signal.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A parsed signal path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignalPath {
    /// The original path string
    raw: String,
    /// Path segments split by '.'
    segments: Vec<String>,
}

impl SignalPath {
    /// Parse a path string into segments.
    ///
    /// Fails on an empty path or on empty segments ("Vehicle..Speed").
    pub fn new(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let segments: Vec<String> = path.split('.').map(String::from).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(path.to_string()));
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// Get the raw path string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Get the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, e.g. "HeartRate" for "Vehicle.Driver.HeartRate".
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Check if this path starts with a given prefix, segment by segment.
    ///
    /// "Vehicle.Speed" does not start with "Vehicle.Spe".
    pub fn starts_with(&self, prefix: &SignalPath) -> bool {
        if prefix.segments.len() > self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(prefix.segments.iter())
            .all(|(a, b)| a == b)
    }

    /// True if `other` lies strictly below this path.
    ///
    /// "Vehicle" is an ancestor of "Vehicle.Speed" but not of itself.
    pub fn is_ancestor_of(&self, other: &SignalPath) -> bool {
        other.segments.len() > self.segments.len() && other.starts_with(self)
    }
}

impl std::fmt::Display for SignalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for SignalPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalPath::new(s)
    }
}

impl TryFrom<&str> for SignalPath {
    type Error = PathError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        SignalPath::new(s)
    }
}

impl TryFrom<String> for SignalPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SignalPath::new(&s)
    }
}

impl From<SignalPath> for String {
    fn from(path: SignalPath) -> Self {
        path.raw
    }
}

/// Errors that can occur when parsing a signal path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("Empty path")]
    Empty,

    #[error("Path contains an empty segment: {0}")]
    EmptySegment(String),
}
