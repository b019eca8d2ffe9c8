//! Listener traits and identity.
//!
//! Listeners are shared as `Arc<dyn ...>` and identified by the address of
//! the listener object, so registering the same object twice is a no-op.

use std::sync::Arc;

use databroker_core::{EntryUpdate, SignalNode};

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListenerKind {
    Path,
    Node,
}

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    kind: ListenerKind,
    addr: usize,
}

impl ListenerId {
    /// Identity of a path or disconnect listener object.
    pub fn of<T: ?Sized>(listener: &T) -> Self {
        Self {
            kind: ListenerKind::Path,
            addr: listener as *const T as *const () as usize,
        }
    }

    /// Identity of a tree listener object.
    pub fn node<T: ?Sized>(listener: &T) -> Self {
        Self {
            kind: ListenerKind::Node,
            addr: listener as *const T as *const () as usize,
        }
    }
}

/// Receives the updates of a leaf-level subscription.
///
/// Callbacks run on the stream's pump task and must not block.
pub trait PathListener: Send + Sync {
    fn on_entry_changed(&self, updates: &[EntryUpdate]);

    fn on_error(&self, error: &BrokerError);

    fn listener_id(&self) -> ListenerId {
        ListenerId::of(self)
    }
}

/// Receives the composite tree of a tree-level subscription.
pub trait NodeListener: Send + Sync {
    fn on_node_changed(&self, node: &SignalNode);

    fn on_error(&self, error: &BrokerError);
}

/// Notified once when a connection is lost or disconnected.
pub trait DisconnectListener: Send + Sync {
    fn on_disconnect(&self);
}

impl<F> DisconnectListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_disconnect(&self) {
        self()
    }
}

/// Listeners in registration order, without duplicates.
pub struct ListenerSet<L: ?Sized> {
    entries: Vec<(ListenerId, Arc<L>)>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns false if `id` is already present.
    pub fn insert(&mut self, id: ListenerId, listener: Arc<L>) -> bool {
        if self.contains(id) {
            return false;
        }
        self.entries.push((id, listener));
        true
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<L>> {
        self.entries.iter().map(|(_, listener)| listener)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl DisconnectListener for Counter {
        fn on_disconnect(&self) {}
    }

    #[test]
    fn test_identity_follows_object() {
        let a = Arc::new(Counter);
        let b = Arc::new(Counter);
        let a_dyn: Arc<dyn DisconnectListener> = a.clone();

        assert_eq!(ListenerId::of(&*a), ListenerId::of(&*a_dyn));
        assert_ne!(ListenerId::of(&*a), ListenerId::of(&*b));
        assert_ne!(ListenerId::of(&*a), ListenerId::node(&*a));
    }

    #[test]
    fn test_set_deduplicates() {
        let a: Arc<dyn DisconnectListener> = Arc::new(Counter);
        let b: Arc<dyn DisconnectListener> = Arc::new(Counter);

        let mut set = ListenerSet::new();
        assert!(set.insert(ListenerId::of(&*a), a.clone()));
        assert!(!set.insert(ListenerId::of(&*a), a.clone()));
        assert!(set.insert(ListenerId::of(&*b), b.clone()));
        assert_eq!(set.len(), 2);

        assert!(set.remove(ListenerId::of(&*a)));
        assert!(!set.remove(ListenerId::of(&*a)));
        assert_eq!(set.len(), 1);
    }
}
