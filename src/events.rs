//! Subscription lists for the notifications a session exposes.
//!
//! An [`EventSource`] holds listeners and invokes them in subscription order. Listeners are
//! called on a snapshot taken outside the lock, so a listener may subscribe or unsubscribe
//! (itself included) while being notified.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::instrument::PassOutcome;

/// A registered listener.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`EventSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An ordered list of listeners for events of type `T`.
pub struct EventSource<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Listener<T>)>>,
}

impl<T> Default for EventSource<T> {
    fn default() -> Self {
        EventSource {
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<T> EventSource<T> {
    /// Creates a source without listeners.
    #[must_use]
    pub fn new() -> Self {
        EventSource::default()
    }

    /// Adds `listener` and returns a handle for removing it.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write_lock!(self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if the handle is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = write_lock!(self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Invokes every listener with `event`.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = read_lock!(self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.listeners).len()
    }

    /// Returns `true` if there are no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read_lock!(self.listeners).is_empty()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        write_lock!(self.listeners).clear();
    }
}

impl<T> fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Lifecycle notifications of the instrumentation pass.
#[derive(Debug, Default)]
pub struct PassEvents {
    /// Fired before the first pending binary is loaded
    pub started: EventSource<()>,
    /// Fired when the pass ends, successfully or not
    pub completed: EventSource<PassOutcome>,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn listeners_run_in_order() {
        let source = EventSource::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        source.subscribe(move |v: &u32| sink.lock().unwrap().push(("first", *v)));
        let sink = seen.clone();
        source.subscribe(move |v: &u32| sink.lock().unwrap().push(("second", *v)));

        source.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribe() {
        let source = EventSource::<()>::new();
        let id = source.subscribe(|_: &()| {});
        assert_eq!(source.len(), 1);
        assert!(source.unsubscribe(id));
        assert!(!source.unsubscribe(id));
        assert!(source.is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let source = Arc::new(EventSource::<()>::new());
        let slot = Arc::new(Mutex::new(None));

        let inner_source = source.clone();
        let inner_slot = slot.clone();
        let id = source.subscribe(move |_: &()| {
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_source.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        source.emit(&());
        assert!(source.is_empty());
    }
}
