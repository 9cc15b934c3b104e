//! Observer registry shared by every controller.
//!
//! Callbacks run synchronously on the thread that mutated the controller, after
//! the controller has released its own lock.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use shared::error::ControllerError;

pub type ErrorCallback = Arc<dyn Fn(&ControllerError) + Send + Sync>;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

pub struct Observers<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .callbacks
            .lock()
            .push((id, Arc::new(callback)));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.callbacks.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    pub fn notify(&self, value: &T) {
        // Callbacks may subscribe or unsubscribe re-entrantly.
        let callbacks: Vec<Callback<T>> = self
            .registry
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn clear(&self) {
        self.registry.callbacks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.registry.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `on_change`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keeps the callback registered for as long as the observed controller lives.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_subscription_stops_notifications() {
        let observers = Observers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let subscription = observers.subscribe(move |value| sink.lock().push(*value));
        observers.notify(&1);
        drop(subscription);
        observers.notify(&2);

        assert_eq!(*seen.lock(), vec![1]);
        assert!(observers.is_empty());
    }

    #[test]
    fn detached_subscription_outlives_handle() {
        let observers = Observers::<u32>::new();
        let seen = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&seen);
        observers
            .subscribe(move |value| *sink.lock() += *value)
            .detach();
        observers.notify(&3);
        observers.notify(&4);

        assert_eq!(*seen.lock(), 7);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn callback_may_unsubscribe_itself_while_notifying() {
        let observers = Observers::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let own = Arc::clone(&slot);
        let subscription = observers.subscribe(move |_| {
            own.lock().take();
        });
        *slot.lock() = Some(subscription);

        observers.notify(&1);
        assert!(observers.is_empty());
    }
}
