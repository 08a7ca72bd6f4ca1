//! Subscriber lists shared by stores, step-change and finish notifications.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of listeners.
///
/// Listeners are snapshotted before being called, so a listener may
/// subscribe or unsubscribe (itself included) while being notified.
pub(crate) struct Listeners<T> {
    inner: Arc<ListenerSet<T>>,
}

struct ListenerSet<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ListenerSet {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((id, Arc::new(listener)));

        let set: Weak<ListenerSet<T>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(set) = set.upgrade() {
                    set.entries.lock().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

/// Handle returned by every `subscribe`-style method.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_in_subscription_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = listeners.subscribe(move |v| first.lock().push(("a", *v)));
        let second = Arc::clone(&seen);
        let _b = listeners.subscribe(move |v| second.lock().push(("b", *v)));

        listeners.notify(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe() {
        let listeners = Listeners::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let subscription = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        listeners.notify(&());
        subscription.unsubscribe();
        listeners.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_dropped_handle_keeps_listener() {
        let listeners = Listeners::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        drop(listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        listeners.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 1);
    }
}
