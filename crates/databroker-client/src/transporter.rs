//! Request building on top of a ready transport.

use std::sync::{Arc, RwLock};

use tracing::debug;

use databroker_core::{DataPoint, Field, SignalPath};
use databroker_protocol::{ReadRequest, ReadResponse, SubscribeRequest, WriteRequest, WriteResponse};

use crate::error::BrokerError;
use crate::subscription::{Subscription, SubscriptionKey};
use crate::transport::{ConnectivityState, Credentials, Transport};

/// Turns paths and fields into broker calls, attaching the current
/// credentials to each of them.
pub struct Transporter {
    transport: Arc<dyn Transport>,
    credentials: RwLock<Option<Credentials>>,
}

impl Transporter {
    /// Fails with [`BrokerError::NotReady`] unless the transport is ready.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self, BrokerError> {
        let state = transport.connectivity_state(false);
        if state != ConnectivityState::Ready {
            return Err(BrokerError::NotReady(state));
        }
        Ok(Self {
            transport,
            credentials: RwLock::new(None),
        })
    }

    pub fn with_credentials(self, credentials: Option<Credentials>) -> Self {
        self.set_credentials(credentials);
        self
    }

    /// Replace the credentials used by subsequent calls.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        match self.credentials.write() {
            Ok(mut guard) => *guard = credentials,
            Err(poisoned) => *poisoned.into_inner() = credentials,
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn read(
        &self,
        path: &SignalPath,
        fields: &[Field],
    ) -> Result<ReadResponse, BrokerError> {
        let credentials = self.credentials();
        let request = ReadRequest::single(path.clone(), fields);
        let response = self.transport.read(request, credentials.as_ref()).await?;
        Ok(response)
    }

    /// Write `datapoint` to each of `fields` as independent updates.
    pub async fn write(
        &self,
        path: &SignalPath,
        fields: &[Field],
        datapoint: &DataPoint,
    ) -> Result<WriteResponse, BrokerError> {
        let credentials = self.credentials();
        let request = WriteRequest::for_fields(path, fields, datapoint);
        let response = self.transport.write(request, credentials.as_ref()).await?;
        Ok(response)
    }

    /// Open a stream for one (path, field) and start pumping it.
    pub async fn open_stream(
        &self,
        path: &SignalPath,
        field: Field,
    ) -> Result<Arc<Subscription>, BrokerError> {
        let credentials = self.credentials();
        let request = SubscribeRequest::single(path.clone(), field);
        let stream = self
            .transport
            .open_stream(request, credentials.as_ref())
            .await?;

        let subscription = Subscription::new(SubscriptionKey::new(path, field));
        subscription.start(stream);
        debug!(key = %subscription.key(), "Stream opened");
        Ok(subscription)
    }
}
