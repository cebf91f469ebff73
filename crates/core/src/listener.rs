//! Copy-on-write listener registry
//!
//! Broadcasting iterates over a snapshot of the subscriber list, so a
//! listener may subscribe or unsubscribe (itself included) from inside its
//! own callback without deadlocking or invalidating the iteration.

use parking_lot::RwLock;
use std::sync::Arc;

/// Receiver of broadcast events
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Thread-safe set of listeners for one event type
///
/// Delivery is in reverse registration order: the most recently subscribed
/// listener sees each event first.
pub struct ListenerPool<E> {
    listeners: RwLock<Arc<Vec<Arc<dyn Listener<E>>>>>,
}

impl<E> ListenerPool<E> {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Add a listener
    ///
    /// Returns false if this exact listener is already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn Listener<E>>) -> bool {
        let mut guard = self.listeners.write();
        if guard.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        true
    }

    /// Remove a listener
    ///
    /// Returns false if it was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<dyn Listener<E>>) -> bool {
        let mut guard = self.listeners.write();
        let before = guard.len();
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    /// Deliver an event to every current listener
    pub fn broadcast(&self, event: &E) {
        let snapshot = self.snapshot();
        for listener in snapshot.iter().rev() {
            listener.on_event(event);
        }
    }

    /// Current listeners in registration order
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn Listener<E>>>> {
        Arc::clone(&self.listeners.read())
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<E> Default for ListenerPool<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity comparison on the data pointer only (vtables may be duplicated)
fn same_listener<E>(a: &Arc<dyn Listener<E>>, b: &Arc<dyn Listener<E>>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
