//! Establishing a connection.
//!
//! The connector asks an idle transport to connect and then polls its state
//! until it becomes ready or the configured timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use databroker_core::ConnectorConfig;

use crate::connection::Connection;
use crate::error::BrokerError;
use crate::transport::{ConnectivityState, Credentials, Transport};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct Connector {
    transport: Arc<dyn Transport>,
    config: ConnectorConfig,
}

impl Connector {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ConnectorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Connect to the broker.
    ///
    /// Fails immediately with [`BrokerError::AlreadyConnecting`] unless the
    /// transport is idle. If the transport is not ready once the timeout has
    /// elapsed it is shut down and [`BrokerError::Timeout`] is returned.
    pub async fn connect(&self) -> Result<Connection, BrokerError> {
        let state = self.transport.connectivity_state(false);
        if state != ConnectivityState::Idle {
            debug!(%state, "Refusing to connect, transport is not idle");
            return Err(BrokerError::AlreadyConnecting);
        }

        let timeout = self.config.timeout();
        let poll_interval = self.config.poll_interval().max(MIN_POLL_INTERVAL);
        let started = Instant::now();

        let mut state = self.transport.connectivity_state(true);
        while state != ConnectivityState::Ready {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }
            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
            state = self.transport.connectivity_state(false);
            debug!(%state, "Polled transport state");
        }

        if state == ConnectivityState::Ready {
            info!(elapsed = ?started.elapsed(), "Connected to broker");
            let credentials = self.config.token.clone().map(Credentials::bearer);
            return Connection::new(self.transport.clone(), credentials);
        }

        warn!(?timeout, %state, "Broker did not become ready, shutting transport down");
        self.transport.shutdown_now();
        Err(BrokerError::Timeout(timeout))
    }
}
