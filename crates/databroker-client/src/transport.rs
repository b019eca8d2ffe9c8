//! Transport boundary.
//!
//! A [`Transport`] carries the three call shapes of the broker API (point
//! read, point write, server-push stream) and reports its connectivity state.
//! Every call accepts optional credentials that the transport attaches to the
//! outgoing request.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::watch;

use databroker_protocol::{
    ReadRequest, ReadResponse, SubscribeRequest, SubscribeResponse, TransportError, WriteRequest,
    WriteResponse,
};

/// Stream of server pushes. A yielded error is terminal.
pub type UpdateStream = BoxStream<'static, Result<SubscribeResponse, TransportError>>;

/// Connectivity state of a transport, modelled on gRPC channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Bearer token credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    const AUTH_SCHEME: &'static str = "Bearer";

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn auth_scheme(&self) -> &'static str {
        Self::AUTH_SCHEME
    }

    /// Value of the `authorization` header, e.g. "Bearer eyJ...".
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.auth_scheme(), self.token)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("scheme", &Self::AUTH_SCHEME)
            .finish_non_exhaustive()
    }
}

/// Connection to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current connectivity state. With `request_connection` an idle
    /// transport starts connecting.
    fn connectivity_state(&self, request_connection: bool) -> ConnectivityState;

    /// Receiver notified on every state change.
    fn watch_state(&self) -> watch::Receiver<ConnectivityState>;

    /// Point read.
    async fn read(
        &self,
        request: ReadRequest,
        credentials: Option<&Credentials>,
    ) -> Result<ReadResponse, TransportError>;

    /// Point write.
    async fn write(
        &self,
        request: WriteRequest,
        credentials: Option<&Credentials>,
    ) -> Result<WriteResponse, TransportError>;

    /// Open a server-push stream. Dropping the stream closes it.
    async fn open_stream(
        &self,
        request: SubscribeRequest,
        credentials: Option<&Credentials>,
    ) -> Result<UpdateStream, TransportError>;

    /// Tear the transport down. It cannot connect again afterwards.
    fn shutdown_now(&self);
}
