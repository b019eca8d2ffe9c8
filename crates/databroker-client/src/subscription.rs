//! One live server stream fanned out to many listeners.
//!
//! A [`Subscription`] owns the pump task that drains an [`UpdateStream`] and
//! remembers the most recent update or error so that a listener joining
//! later is brought up to date immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use databroker_core::{Field, SignalPath};
use databroker_protocol::SubscribeResponse;

use crate::error::BrokerError;
use crate::listener::{ListenerId, ListenerSet, PathListener};
use crate::transport::UpdateStream;

/// Registry key: one subscription per (path, field).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn new(path: &SignalPath, field: Field) -> Self {
        Self(format!("{path}#{field}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct SubscriptionState {
    listeners: ListenerSet<dyn PathListener>,
    last_update: Option<SubscribeResponse>,
    last_error: Option<BrokerError>,
    cancelled: bool,
}

/// A server stream shared by every listener of one key.
pub struct Subscription {
    key: SubscriptionKey,
    state: Mutex<SubscriptionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub(crate) fn new(key: SubscriptionKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: Mutex::new(SubscriptionState::default()),
            pump: Mutex::new(None),
        })
    }

    /// Spawn the task draining `stream` into this subscription.
    ///
    /// The task only holds a weak reference, so dropping the last
    /// subscription handle ends it as well.
    pub(crate) fn start(self: &Arc<Self>, mut stream: UpdateStream) {
        let weak: Weak<Subscription> = Arc::downgrade(self);
        let key = self.key.clone();

        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let Some(subscription) = weak.upgrade() else {
                    return;
                };
                match item {
                    Ok(response) => subscription.deliver_update(response),
                    Err(err) => {
                        warn!(%key, error = %err, "Subscription stream failed");
                        subscription.deliver_error(BrokerError::Transport(err));
                        return;
                    }
                }
            }
            debug!(%key, "Subscription stream completed");
        });

        let mut pump = lock(&self.pump);
        if self.is_cancelled() {
            handle.abort();
        } else {
            *pump = Some(handle);
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Add a listener and replay the last error, or else the last update, to
    /// it alone. Returns false if the listener was already registered.
    pub fn register(&self, listener: Arc<dyn PathListener>) -> bool {
        let mut state = lock(&self.state);
        if state.cancelled {
            return false;
        }

        let id = listener.listener_id();
        if !state.listeners.insert(id, listener.clone()) {
            return false;
        }

        if let Some(err) = &state.last_error {
            listener.on_error(err);
        } else if let Some(update) = &state.last_update {
            listener.on_entry_changed(&update.updates);
        }
        true
    }

    /// Returns false if the listener was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        lock(&self.state).listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).listeners.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    pub fn last_update(&self) -> Option<SubscribeResponse> {
        lock(&self.state).last_update.clone()
    }

    pub fn last_error(&self) -> Option<BrokerError> {
        lock(&self.state).last_error.clone()
    }

    /// Close the stream. No callback fires afterwards. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.state);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.listeners.clear();
        }
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
        debug!(key = %self.key, "Subscription cancelled");
    }

    pub(crate) fn deliver_update(&self, response: SubscribeResponse) {
        let mut state = lock(&self.state);
        if state.cancelled {
            return;
        }
        for listener in state.listeners.iter() {
            listener.on_entry_changed(&response.updates);
        }
        state.last_update = Some(response);
        state.last_error = None;
    }

    pub(crate) fn deliver_error(&self, error: BrokerError) {
        let mut state = lock(&self.state);
        if state.cancelled {
            return;
        }
        for listener in state.listeners.iter() {
            listener.on_error(&error);
        }
        state.last_error = Some(error);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

// Listener callbacks never unwind through the lock, so recovering the guard
// from a poisoned mutex is sound.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
