//! Client error type.

use std::time::Duration;

use databroker_core::TreeError;
use databroker_protocol::TransportError;
use thiserror::Error;

use crate::transport::ConnectivityState;

/// Errors surfaced by the connector, the connection and subscriptions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// `connect()` was called on a transport that is not idle.
    #[error("Connector is already trying to establish a connection")]
    AlreadyConnecting,

    /// The transport did not become ready within the configured timeout.
    #[error("Timed out after {0:?} waiting for the broker to become ready")]
    Timeout(Duration),

    /// The transport must be ready before a transporter can use it.
    #[error("Transport needs to be connected to the broker, current state: {0}")]
    NotReady(ConnectivityState),

    /// The connection was disconnected or lost.
    #[error("Connection has been shut down")]
    Shutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl BrokerError {
    /// The underlying transport error, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            BrokerError::Transport(err) => Some(err),
            _ => None,
        }
    }
}
