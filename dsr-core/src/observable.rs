// dsr-core/src/observable.rs
//! Minimal observable slots used for stage, availability and phase
//! notification.
//!
//! The engine updates a slot silently while a resolution pass is running and
//! fires listeners once the pass has converged, so a listener never sees an
//! intermediate value. Listeners run with no internal lock held and may read
//! anything, but mutating the registry from inside one is rejected; use
//! `DependencyService::schedule` instead.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub(crate) struct Listeners<T> {
    entries: Mutex<Vec<(Subscription, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn add(&self, listener: Listener<T>) -> Subscription {
        let sub = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((sub, listener));
        sub
    }

    pub(crate) fn remove(&self, sub: Subscription) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(s, _)| *s != sub);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Calls every listener registered at the time of the call. The list is
    /// copied first so listeners may subscribe or unsubscribe freely.
    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

struct Slot<T> {
    value: RwLock<T>,
    listeners: Listeners<T>,
}

/// A shared value with change listeners. Cloning yields another handle to
/// the same slot.
pub struct Observable<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            slot: Arc::new(Slot {
                value: RwLock::new(initial),
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.slot.value.read().clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.slot.listeners.add(Arc::new(listener))
    }

    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        self.slot.listeners.remove(sub)
    }

    pub fn listener_count(&self) -> usize {
        self.slot.listeners.len()
    }

    /// Stores a new value without notifying; returns the previous one.
    pub(crate) fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.slot.value.write(), value)
    }

    pub(crate) fn notify(&self) {
        let value = self.get();
        self.slot.listeners.emit(&value);
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable")
            .field(&*self.slot.value.read())
            .finish()
    }
}
