//! Observable store - a mutable value with synchronous change notification.
//!
//! The store replaces its value wholesale on every [`Store::set`] and then
//! notifies every current subscriber exactly once with the new value.
//! Subscribers are NOT called on subscription; read [`Store::get`] if the
//! current value is needed up front.
//!
//! Notification iterates over a snapshot of the listener list taken after the
//! value is replaced, and no lock is held while listeners run. A listener may
//! therefore call `set`, `subscribe` or unsubscribe re-entrantly; listeners
//! added during a pass are first called on the next mutation, listeners
//! removed during a pass still receive the pass they were snapshotted for.
//! A panicking listener unwinds into the caller of `set`.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T> Listeners<T> {
    fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

struct StoreInner<T> {
    value: RwLock<T>,
    initial: T,
    listeners: Arc<Mutex<Listeners<T>>>,
}

/// A shared, observable state container.
///
/// Cloning a `Store` yields another handle to the same value and subscribers.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Create a new store. `initial` is also kept as the immutable
    /// [`get_initial`](Store::get_initial) snapshot.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                value: RwLock::new(initial.clone()),
                initial,
                listeners: Arc::new(Mutex::new(Listeners {
                    next_id: 0,
                    entries: Vec::new(),
                })),
            }),
        }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Get a clone of the value captured at construction.
    pub fn get_initial(&self) -> T {
        self.inner.initial.clone()
    }

    /// Read the current value without cloning it.
    ///
    /// The store is locked for reading while `f` runs; do not call `set`
    /// from inside it.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.inner.value.read())
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, next: T) {
        *self.inner.value.write() = next.clone();
        self.notify(&next);
    }

    /// Compute the next value from the current one, then replace and notify.
    pub fn set_with<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get();
        self.set(f(&current));
    }

    /// Subscribe to value changes.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`unsubscribe`](Subscription::unsubscribe)d.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }

    fn notify(&self, value: &T) {
        let snapshot = self.inner.listeners.lock().snapshot();
        for listener in snapshot {
            listener(value);
        }
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("value", &*self.inner.value.read())
            .field("subscribers", &self.inner.listeners.lock().entries.len())
            .finish()
    }
}

/// RAII handle for a store listener.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription<T> {
    id: u64,
    listeners: Weak<Mutex<Listeners<T>>>,
}

impl<T> Subscription<T> {
    /// Remove the listener. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
