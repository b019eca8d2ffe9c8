//! The connection facade.
//!
//! A [`Connection`] is handed out by the connector once the transport is
//! ready. It offers leaf and tree level reads, writes and subscriptions, and
//! watches the transport: when the transport leaves the ready state, every
//! subscription is cancelled and the disconnect listeners are told once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use databroker_core::{DataPoint, Field, SignalNode, SignalPath, TreeError};
use databroker_protocol::{ReadResponse, WriteResponse};

use crate::error::BrokerError;
use crate::listener::{DisconnectListener, ListenerId, ListenerSet, NodeListener, PathListener};
use crate::subscriber::Subscriber;
use crate::transport::{ConnectivityState, Credentials, Transport};
use crate::transporter::Transporter;

type DisconnectListeners = Arc<Mutex<ListenerSet<dyn DisconnectListener>>>;

pub struct Connection {
    transport: Arc<dyn Transport>,
    transporter: Arc<Transporter>,
    subscriber: Arc<Subscriber>,
    disconnect_listeners: DisconnectListeners,
    shutdown: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl Connection {
    /// Wrap a ready transport. Must be called from within a tokio runtime.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        credentials: Option<Credentials>,
    ) -> Result<Self, BrokerError> {
        let transporter =
            Arc::new(Transporter::new(transport.clone())?.with_credentials(credentials));
        let subscriber = Arc::new(Subscriber::new(transporter.clone()));
        let disconnect_listeners: DisconnectListeners = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let watcher = tokio::spawn(watch_connectivity(
            transport.watch_state(),
            transport.clone(),
            subscriber.clone(),
            disconnect_listeners.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            transport,
            transporter,
            subscriber,
            disconnect_listeners,
            shutdown,
            watcher,
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(BrokerError::Shutdown);
        }
        Ok(())
    }

    /// Read `fields` of `path`; a branch path returns all its descendants.
    pub async fn read(
        &self,
        path: &SignalPath,
        fields: &[Field],
    ) -> Result<ReadResponse, BrokerError> {
        self.ensure_open()?;
        self.transporter.read(path, fields).await
    }

    /// Write `datapoint` to every field in `fields` of `path`.
    pub async fn write(
        &self,
        path: &SignalPath,
        fields: &[Field],
        datapoint: &DataPoint,
    ) -> Result<WriteResponse, BrokerError> {
        self.ensure_open()?;
        self.transporter.write(path, fields, datapoint).await
    }

    pub async fn subscribe(
        &self,
        path: &SignalPath,
        field: Field,
        listener: Arc<dyn PathListener>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.subscriber.subscribe(path, field, listener).await
    }

    pub async fn unsubscribe(&self, path: &SignalPath, field: Field, listener: &dyn PathListener) {
        if self.ensure_open().is_err() {
            return;
        }
        self.subscriber.unsubscribe(path, field, listener).await
    }

    /// Read the whole subtree in one call and fold the results into a copy
    /// of `node`.
    ///
    /// For each entry the first requested value-bearing field wins. Entries
    /// outside `node` are skipped. Returns `node` unchanged if the broker
    /// reports no entries.
    pub async fn read_node(
        &self,
        node: &SignalNode,
        fields: &[Field],
    ) -> Result<SignalNode, BrokerError> {
        self.ensure_open()?;
        let response = self.transporter.read(node.path(), fields).await?;

        if response.entries.is_empty() {
            warn!(path = %node.path(), errors = response.errors.len(), "No entries returned for node");
            return Ok(node.clone());
        }

        let mut updated = node.clone();
        for entry in &response.entries {
            let Some(value) = fields.iter().find_map(|field| entry.datapoint(*field)) else {
                continue;
            };
            match updated.replace_at_path(&entry.path, value.clone()) {
                Ok(node) => updated = node,
                Err(TreeError::NotFound(path)) => {
                    warn!(%path, "Skipping entry unknown to the local tree");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(updated)
    }

    /// Write the value of every leaf of `node`, one call per leaf, in leaf
    /// order. A rejected leaf does not stop the others; its error is in the
    /// corresponding response.
    pub async fn write_node(
        &self,
        node: &SignalNode,
        fields: &[Field],
    ) -> Result<Vec<WriteResponse>, BrokerError> {
        self.ensure_open()?;
        let mut responses = Vec::new();
        for leaf in node.leaves() {
            let response = self.transporter.write(&leaf.path, fields, &leaf.value).await?;
            responses.push(response);
        }
        Ok(responses)
    }

    pub async fn subscribe_node(
        &self,
        node: &SignalNode,
        field: Field,
        listener: Arc<dyn NodeListener>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.subscriber.subscribe_node(node, field, listener).await
    }

    pub async fn unsubscribe_node(
        &self,
        node: &SignalNode,
        field: Field,
        listener: &dyn NodeListener,
    ) {
        if self.ensure_open().is_err() {
            return;
        }
        self.subscriber.unsubscribe_node(node, field, listener).await
    }

    /// Returns false if the listener was already registered, or if the
    /// connection is already shut down and would never call it.
    pub fn register_disconnect_listener(&self, listener: Arc<dyn DisconnectListener>) -> bool {
        let id = ListenerId::of(&*listener);
        let mut listeners = lock(&*self.disconnect_listeners);
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        listeners.insert(id, listener)
    }

    pub fn unregister_disconnect_listener(&self, listener: &dyn DisconnectListener) -> bool {
        lock(&*self.disconnect_listeners).remove(ListenerId::of(listener))
    }

    /// Shut the transport down. Idempotent.
    ///
    /// New subscriptions are refused as soon as this returns. Live streams
    /// are cancelled and disconnect listeners notified shortly after, by the
    /// connectivity watcher, so `subscription_count` may briefly stay
    /// non-zero.
    pub fn disconnect(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disconnecting from broker");
        self.subscriber.close();
        self.transport.shutdown_now();
    }

    /// Replace the credentials attached to subsequent calls.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        self.transporter.set_credentials(credentials);
    }

    pub fn state(&self) -> ConnectivityState {
        self.transport.connectivity_state(false)
    }

    pub fn is_connected(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst) && self.state() == ConnectivityState::Ready
    }

    /// Number of live (path, field) subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriber.subscription_count().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // After a disconnect the watcher still has teardown to finish
        if !self.shutdown.load(Ordering::SeqCst) {
            self.watcher.abort();
        }
    }
}

async fn watch_connectivity(
    mut state: watch::Receiver<ConnectivityState>,
    transport: Arc<dyn Transport>,
    subscriber: Arc<Subscriber>,
    listeners: DisconnectListeners,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if *state.borrow_and_update() != ConnectivityState::Ready {
            break;
        }
        if state.changed().await.is_err() {
            debug!("Transport state channel closed");
            break;
        }
    }

    let last = *state.borrow();
    info!(state = %last, "Connection to broker lost");
    shutdown.store(true, Ordering::SeqCst);
    subscriber.close();
    if last != ConnectivityState::Shutdown {
        transport.shutdown_now();
    }

    subscriber.cancel_all().await;

    // Snapshot so listeners may touch the set from their callback
    let snapshot: Vec<Arc<dyn DisconnectListener>> = lock(&*listeners).iter().cloned().collect();
    for listener in snapshot {
        listener.on_disconnect();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
