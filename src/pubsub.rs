//! Listener registry shared by the error log and the processing status monitor.
//!
//! Delivery is synchronous and happens on the emitting thread, in registration order. The
//! listener list is snapshotted before delivery, so a listener may subscribe, unsubscribe, or
//! call back into the emitting component without deadlocking. A panicking listener is caught
//! and logged; the remaining listeners still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Ordered set of callbacks receiving events of type `E`.
pub struct ListenerSet<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> ListenerSet<E> {
    /// Create an empty listener set.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener and return the handle that removes it again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry)
                        .listeners
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every registered listener.
    ///
    /// Returns the number of listeners that panicked during delivery.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut failures = 0;
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                failures += 1;
                tracing::warn!("Listener panicked during delivery; continuing with the rest");
            }
        }
        failures
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`ListenerSet::subscribe`].
///
/// Dropping the handle leaves the listener registered; call [`Subscription::unsubscribe`] to
/// remove it.
#[must_use = "dropping a subscription keeps the listener registered; call `detach` instead"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener from its set. Safe to call after the set has been dropped.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener registered for the lifetime of the set.
    pub fn detach(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            set.subscribe(move |value: &u32| seen.lock().unwrap().push((tag, *value)))
                .detach();
        }

        set.emit(&7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let set = ListenerSet::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        set.subscribe(|_| panic!("listener failure")).detach();
        let counter = Arc::clone(&calls);
        set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();

        let failures = set.emit(&());
        assert_eq!(failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let set = ListenerSet::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        set.emit(&());
        subscription.unsubscribe();
        set.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn listener_may_subscribe_during_delivery() {
        let set = Arc::new(ListenerSet::<()>::new());
        let inner = Arc::clone(&set);
        set.subscribe(move |_| inner.subscribe(|_| {}).detach())
            .detach();

        set.emit(&());
        assert_eq!(set.len(), 2);
    }
}
