//! Transport-level call status.
//!
//! A `TransportError` means the call itself failed (peer unreachable, stream
//! cancelled, credentials rejected) as opposed to an application error that
//! the broker reports inside a response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes for failed calls, modelled on gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Unavailable,
    NotFound,
    Unauthenticated,
    PermissionDenied,
    Cancelled,
    Internal,
    Unknown,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A failed transport call.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: StatusCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TransportError::unavailable("io exception");
        assert_eq!(err.to_string(), "UNAVAILABLE: io exception");
    }

    #[test]
    fn test_serialize() {
        let err = TransportError::unauthenticated("missing token");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"code":"UNAUTHENTICATED","message":"missing token"}"#);
    }
}
