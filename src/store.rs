//! Observable step-local state.

use crate::listeners::{Listeners, Subscription};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Produces the initial state of a fresh [`Store`].
pub type StoreFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// State owned by one step instance.
///
/// Cloning a `Store` clones the handle, not the state. Every mutation notifies
/// subscribers after the internal lock is released, so a listener may read the
/// store or even write to it again.
///
/// ```
/// use michi::Store;
/// use serde_json::json;
///
/// let store = Store::new(json!({"attempts": 0}));
/// store.update(|state| state["attempts"] = json!(1));
/// assert_eq!(store.get_state(), json!({"attempts": 1}));
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<Value>,
    listeners: Listeners<Value>,
}

impl Store {
    pub fn new(initial: Value) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(initial),
                listeners: Listeners::new(),
            }),
        }
    }

    pub(crate) fn from_factory(factory: &StoreFactory) -> Self {
        Self::new(factory())
    }

    /// Returns a copy of the current state.
    pub fn get_state(&self) -> Value {
        self.inner.state.lock().clone()
    }

    /// Replaces the state and notifies subscribers.
    pub fn set_state(&self, state: Value) {
        let snapshot = {
            let mut guard = self.inner.state.lock();
            *guard = state;
            guard.clone()
        };
        self.inner.listeners.notify(&snapshot);
    }

    /// Mutates the state in place and notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        let snapshot = {
            let mut guard = self.inner.state.lock();
            f(&mut *guard);
            guard.clone()
        };
        self.inner.listeners.notify(&snapshot);
    }

    /// Registers a listener called with the new state after every change.
    pub fn subscribe(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Returns `true` when both handles point at the same state.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
