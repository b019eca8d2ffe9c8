//! Subscription registry.
//!
//! The [`Subscriber`] keeps at most one [`Subscription`] per (path, field).
//! Listeners for the same key share its stream; the stream is cancelled when
//! the last listener leaves. Tree-level subscriptions are expanded into one
//! leaf subscription per leaf, all feeding a single aggregating adapter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use databroker_core::{EntryUpdate, Field, SignalNode, SignalPath};

use crate::error::BrokerError;
use crate::listener::{ListenerId, NodeListener, PathListener};
use crate::subscription::{Subscription, SubscriptionKey};
use crate::transporter::Transporter;

pub struct Subscriber {
    transporter: Arc<Transporter>,
    subscriptions: tokio::sync::Mutex<HashMap<SubscriptionKey, Arc<Subscription>>>,
    closed: AtomicBool,
}

impl Subscriber {
    pub fn new(transporter: Arc<Transporter>) -> Self {
        Self {
            transporter,
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse new subscriptions from now on. Existing ones stay until
    /// [`cancel_all`](Self::cancel_all).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register `listener` for `field` of `path`, opening a stream if no
    /// listener is subscribed to that key yet.
    pub async fn subscribe(
        &self,
        path: &SignalPath,
        field: Field,
        listener: Arc<dyn PathListener>,
    ) -> Result<(), BrokerError> {
        self.register(path, field, listener).await.map(|_| ())
    }

    /// Returns whether the listener was newly added.
    async fn register(
        &self,
        path: &SignalPath,
        field: Field,
        listener: Arc<dyn PathListener>,
    ) -> Result<bool, BrokerError> {
        let key = SubscriptionKey::new(path, field);
        let mut subscriptions = self.subscriptions.lock().await;
        if self.is_closed() {
            return Err(BrokerError::Shutdown);
        }

        let subscription = match subscriptions.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let created = self.transporter.open_stream(path, field).await?;
                debug!(%key, "Subscription created");
                subscriptions.insert(key, created.clone());
                created
            }
        };

        Ok(subscription.register(listener))
    }

    /// Remove `listener` from `field` of `path`. Unknown keys are ignored.
    pub async fn unsubscribe(&self, path: &SignalPath, field: Field, listener: &dyn PathListener) {
        self.unsubscribe_id(path, field, listener.listener_id()).await
    }

    async fn unsubscribe_id(&self, path: &SignalPath, field: Field, id: ListenerId) {
        let key = SubscriptionKey::new(path, field);
        let mut subscriptions = self.subscriptions.lock().await;

        let Some(subscription) = subscriptions.get(&key) else {
            return;
        };
        subscription.unregister(id);

        if subscription.is_empty() {
            subscription.cancel();
            subscriptions.remove(&key);
            debug!(%key, "Last listener left, subscription removed");
        }
    }

    /// Subscribe `listener` to every leaf of `node`.
    ///
    /// The listener receives the composite tree once every leaf has
    /// delivered at least one value, and on every delivery after that. If a
    /// leaf cannot be subscribed, the leaves already subscribed by this call
    /// are released again.
    pub async fn subscribe_node(
        &self,
        node: &SignalNode,
        field: Field,
        listener: Arc<dyn NodeListener>,
    ) -> Result<(), BrokerError> {
        let adapter: Arc<dyn PathListener> =
            Arc::new(NodePathListener::new(node, field, listener));
        let id = adapter.listener_id();

        let mut registered: Vec<&SignalPath> = Vec::new();
        for leaf in node.leaves() {
            match self.register(&leaf.path, field, adapter.clone()).await {
                Ok(true) => registered.push(&leaf.path),
                Ok(false) => {}
                Err(err) => {
                    for path in registered {
                        self.unsubscribe_id(path, field, id).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub async fn unsubscribe_node(
        &self,
        node: &SignalNode,
        field: Field,
        listener: &dyn NodeListener,
    ) {
        let id = ListenerId::node(listener);
        for leaf in node.leaves() {
            self.unsubscribe_id(&leaf.path, field, id).await;
        }
    }

    /// Close the registry, then cancel and drop every subscription.
    pub async fn cancel_all(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        self.close();
        let count = subscriptions.len();
        for (_, subscription) in subscriptions.drain() {
            subscription.cancel();
        }
        if count > 0 {
            info!(count, "Cancelled all subscriptions");
        }
    }

    /// Number of live keys.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Number of listeners on one key.
    pub async fn listener_count(&self, path: &SignalPath, field: Field) -> usize {
        let key = SubscriptionKey::new(path, field);
        self.subscriptions
            .lock()
            .await
            .get(&key)
            .map_or(0, |subscription| subscription.listener_count())
    }
}

struct Aggregate {
    node: SignalNode,
    pending: HashSet<SignalPath>,
}

/// Folds leaf updates into a composite tree for a [`NodeListener`].
struct NodePathListener {
    id: ListenerId,
    field: Field,
    listener: Arc<dyn NodeListener>,
    aggregate: Mutex<Aggregate>,
}

impl NodePathListener {
    fn new(node: &SignalNode, field: Field, listener: Arc<dyn NodeListener>) -> Self {
        let pending = node.leaves().into_iter().map(|leaf| leaf.path.clone()).collect();
        Self {
            id: ListenerId::node(&*listener),
            field,
            listener,
            aggregate: Mutex::new(Aggregate {
                node: node.clone(),
                pending,
            }),
        }
    }
}

impl PathListener for NodePathListener {
    fn on_entry_changed(&self, updates: &[EntryUpdate]) {
        let mut aggregate = self
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut applied = false;
        for update in updates {
            let entry = &update.entry;
            // Metadata carries no leaf value; receiving it still counts
            if let Some(value) = entry.datapoint(self.field) {
                match aggregate.node.replace_at_path(&entry.path, value.clone()) {
                    Ok(node) => aggregate.node = node,
                    Err(err) => {
                        self.listener.on_error(&BrokerError::Tree(err));
                        continue;
                    }
                }
            }
            aggregate.pending.remove(&entry.path);
            applied = true;
        }

        if applied && aggregate.pending.is_empty() {
            self.listener.on_node_changed(&aggregate.node);
        }
    }

    fn on_error(&self, error: &BrokerError) {
        self.listener.on_error(error);
    }

    fn listener_id(&self) -> ListenerId {
        self.id
    }
}
