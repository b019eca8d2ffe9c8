//! In-process broker.
//!
//! [`MemoryBroker`] implements [`Transport`] on top of a [`MemoryStore`].
//! Writes are applied to the store and broadcast to every open stream whose
//! subscription covers the changed path and field. It backs the CLI demo and
//! the test suites, and offers hooks to drive connectivity and stream
//! failures from the outside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use databroker_core::{
    DataEntry, DataPoint, EntryUpdate, Field, MemoryStore, SignalPath, SignalStore, StoreError,
};
use databroker_protocol::{
    DataEntryError, ReadRequest, ReadResponse, SubscribeEntry, SubscribeRequest,
    SubscribeResponse, TransportError, WriteRequest, WriteResponse,
};

use crate::transport::{ConnectivityState, Credentials, Transport, UpdateStream};

const EVENT_CAPACITY: usize = 1024;

/// How an idle broker reacts to a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Ready as soon as a connection is requested.
    #[default]
    Immediate,
    /// Ready after the given delay.
    After(Duration),
    /// Stays connecting forever.
    Never,
}

#[derive(Debug, Clone)]
enum BrokerEvent {
    Changed { entry: DataEntry, field: Field },
    StreamFailure {
        path: SignalPath,
        error: TransportError,
    },
    Shutdown,
}

/// A broker living in the client process.
pub struct MemoryBroker {
    store: RwLock<MemoryStore>,
    state: Arc<watch::Sender<ConnectivityState>>,
    events: broadcast::Sender<BrokerEvent>,
    readiness: Readiness,
    required_token: Option<String>,
    open_streams: Arc<AtomicUsize>,
    streams_opened: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(store: MemoryStore) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: RwLock::new(store),
            state: Arc::new(state),
            events,
            readiness: Readiness::default(),
            required_token: None,
            open_streams: Arc::new(AtomicUsize::new(0)),
            streams_opened: AtomicUsize::new(0),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Reject every call that does not carry this bearer token.
    pub fn with_required_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    /// Set a signal field as a data feed would and notify streams.
    pub async fn publish(
        &self,
        path: &SignalPath,
        field: Field,
        value: DataPoint,
    ) -> Result<(), StoreError> {
        let entry = self.store.write().await.set(path, field, value)?;
        self.broadcast_change(entry, field);
        Ok(())
    }

    /// Current value of a signal field, `None` if unknown or unset.
    pub async fn value(&self, path: &SignalPath, field: Field) -> Option<DataPoint> {
        let store = self.store.read().await;
        let entries = store.get(path, &[field]).ok()?;
        entries
            .into_iter()
            .find(|entry| &entry.path == path)
            .and_then(|entry| entry.datapoint(field).cloned())
            .filter(DataPoint::is_set)
    }

    /// Fail every open stream subscribed at or below `path`.
    pub fn fail_streams(&self, path: &SignalPath, error: TransportError) {
        let _ = self.events.send(BrokerEvent::StreamFailure {
            path: path.clone(),
            error,
        });
    }

    /// Force the connectivity state, e.g. to simulate a lost link.
    pub fn set_state(&self, state: ConnectivityState) {
        info!(%state, "Broker state forced");
        self.state.send_replace(state);
    }

    /// Number of streams currently open.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Number of streams opened since the broker was created.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    fn broadcast_change(&self, entry: DataEntry, field: Field) {
        // No receivers simply means no open streams
        let _ = self.events.send(BrokerEvent::Changed { entry, field });
    }

    fn check_call(&self, credentials: Option<&Credentials>) -> Result<(), TransportError> {
        let state = *self.state.borrow();
        if state != ConnectivityState::Ready {
            return Err(TransportError::unavailable(format!(
                "broker is not ready ({state})"
            )));
        }

        if let Some(required) = &self.required_token {
            match credentials {
                Some(credentials) if credentials.token() == required => {}
                Some(_) => return Err(TransportError::unauthenticated("invalid token")),
                None => return Err(TransportError::unauthenticated("missing token")),
            }
        }
        Ok(())
    }

    fn request_connection(&self) -> ConnectivityState {
        match self.readiness {
            Readiness::Immediate => {
                self.state.send_replace(ConnectivityState::Ready);
            }
            Readiness::Never => {
                self.state.send_replace(ConnectivityState::Connecting);
            }
            Readiness::After(delay) => {
                self.state.send_replace(ConnectivityState::Connecting);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let state = self.state.clone();
                        handle.spawn(async move {
                            tokio::time::sleep(delay).await;
                            state.send_if_modified(|current| {
                                if *current == ConnectivityState::Connecting {
                                    *current = ConnectivityState::Ready;
                                    true
                                } else {
                                    false
                                }
                            });
                        });
                    }
                    Err(_) => warn!("No runtime available, broker stays connecting"),
                }
            }
        }
        *self.state.borrow()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    fn connectivity_state(&self, request_connection: bool) -> ConnectivityState {
        let state = *self.state.borrow();
        if request_connection && state == ConnectivityState::Idle {
            return self.request_connection();
        }
        state
    }

    fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    async fn read(
        &self,
        request: ReadRequest,
        credentials: Option<&Credentials>,
    ) -> Result<ReadResponse, TransportError> {
        self.check_call(credentials)?;

        let store = self.store.read().await;
        let mut response = ReadResponse::default();
        for entry in request.entries {
            match store.get(&entry.path, &entry.fields) {
                Ok(entries) => response.entries.extend(entries),
                Err(err) => response
                    .errors
                    .push(DataEntryError::from_store_error(entry.path, &err)),
            }
        }
        Ok(response)
    }

    async fn write(
        &self,
        request: WriteRequest,
        credentials: Option<&Credentials>,
    ) -> Result<WriteResponse, TransportError> {
        self.check_call(credentials)?;

        let mut response = WriteResponse::default();
        let mut changed = Vec::new();
        {
            let mut store = self.store.write().await;
            for update in request.updates {
                let path = update.entry.path.clone();
                for field in update.fields {
                    let result = match update.entry.datapoint(field) {
                        Some(value) => store.set(&path, field, value.clone()),
                        None => Err(StoreError::ReadOnly(path.clone(), field)),
                    };
                    match result {
                        Ok(entry) => changed.push((entry, field)),
                        Err(err) => {
                            debug!(%path, %field, error = %err, "Write rejected");
                            response
                                .errors
                                .push(DataEntryError::from_store_error(path.clone(), &err));
                        }
                    }
                }
            }
        }

        for (entry, field) in changed {
            self.broadcast_change(entry, field);
        }
        Ok(response)
    }

    async fn open_stream(
        &self,
        request: SubscribeRequest,
        credentials: Option<&Credentials>,
    ) -> Result<UpdateStream, TransportError> {
        self.check_call(credentials)?;

        // Subscribe before taking the snapshot so no change falls in between
        let events = self.events.subscribe();

        let mut initial = Vec::new();
        {
            let store = self.store.read().await;
            for entry in &request.subscribe {
                let entries = match store.get(&entry.path, &entry.fields) {
                    Ok(entries) => entries,
                    Err(err) => {
                        let error = TransportError::not_found(err.to_string());
                        let failed = stream::once(async move { Err::<SubscribeResponse, _>(error) });
                        return Ok(failed.boxed());
                    }
                };
                initial.extend(entries.into_iter().filter_map(|data| {
                    let fields: Vec<Field> = entry
                        .fields
                        .iter()
                        .copied()
                        .filter(|field| data.datapoint(*field).is_some_and(DataPoint::is_set))
                        .collect();
                    (!fields.is_empty()).then(|| EntryUpdate::new(data, fields))
                }));
            }
        }

        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let state = StreamState {
            initial: (!initial.is_empty()).then_some(SubscribeResponse { updates: initial }),
            events,
            entries: request.subscribe,
            done: false,
            _guard: OpenStreamGuard::new(self.open_streams.clone()),
        };

        Ok(stream::unfold(state, next_push).boxed())
    }

    fn shutdown_now(&self) {
        let previous = self.state.send_replace(ConnectivityState::Shutdown);
        if previous != ConnectivityState::Shutdown {
            info!("Broker shut down");
            let _ = self.events.send(BrokerEvent::Shutdown);
        }
    }
}

struct StreamState {
    initial: Option<SubscribeResponse>,
    events: broadcast::Receiver<BrokerEvent>,
    entries: Vec<SubscribeEntry>,
    done: bool,
    _guard: OpenStreamGuard,
}

impl StreamState {
    fn covers(&self, path: &SignalPath, field: Field) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.fields.contains(&field) && path.starts_with(&entry.path))
    }

    fn affected_by(&self, failed: &SignalPath) -> bool {
        self.entries.iter().any(|entry| entry.path.starts_with(failed))
    }
}

async fn next_push(
    mut state: StreamState,
) -> Option<(Result<SubscribeResponse, TransportError>, StreamState)> {
    if state.done {
        return None;
    }
    if let Some(initial) = state.initial.take() {
        return Some((Ok(initial), state));
    }

    loop {
        match state.events.recv().await {
            Ok(BrokerEvent::Changed { entry, field }) => {
                if state.covers(&entry.path, field) {
                    let push = SubscribeResponse {
                        updates: vec![EntryUpdate::new(entry, vec![field])],
                    };
                    return Some((Ok(push), state));
                }
            }
            Ok(BrokerEvent::StreamFailure { path, error }) => {
                if state.affected_by(&path) {
                    state.done = true;
                    return Some((Err(error), state));
                }
            }
            Ok(BrokerEvent::Shutdown) | Err(RecvError::Closed) => {
                state.done = true;
                let error = TransportError::unavailable("broker shut down");
                return Some((Err(error), state));
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Stream lagged behind broker events");
            }
        }
    }
}

struct OpenStreamGuard(Arc<AtomicUsize>);

impl OpenStreamGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
