//! A value mirrored into a [`KeyValueStore`] entry.
//!
//! The in-memory value is authoritative for the local context. Store failures
//! never roll it back; they are logged and handed to `on_error` so the caller
//! can see that memory and store have diverged. When the store publishes change
//! events, writes from other contexts flow back in through the same decode and
//! validation path used on load.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use shared::{domain::StorageScope, error::ControllerError};
use storage::{KeyValueStore, StorageEvent};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, info, warn};

use crate::{
    debounce::{DebounceOptions, Debouncer},
    lifecycle::Dispose,
    observer::{ErrorCallback, Observers, Subscription},
};

pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PersistOptions<T> {
    /// Stored or incoming values failing this check are ignored.
    pub validator: Option<Validator<T>>,
    pub sync_across_contexts: bool,
    /// Coalesces store writes; memory still updates on every `set_value`.
    pub write_delay: Option<Duration>,
    /// Prepended verbatim to the key.
    pub key_prefix: Option<String>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> Default for PersistOptions<T> {
    fn default() -> Self {
        Self {
            validator: None,
            sync_across_contexts: true,
            write_delay: None,
            key_prefix: None,
            on_error: None,
        }
    }
}

impl<T> PersistOptions<T> {
    pub fn validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn sync_across_contexts(mut self, enabled: bool) -> Self {
        self.sync_across_contexts = enabled;
        self
    }

    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ControllerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

struct CellInner<T> {
    key: String,
    store: Arc<dyn KeyValueStore>,
    initial: T,
    validator: Option<Validator<T>>,
    on_error: Option<ErrorCallback>,
    value: Mutex<T>,
    observers: Observers<T>,
    writer: Option<Debouncer<()>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<T> CellInner<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    fn report(&self, err: ControllerError) {
        report(&self.on_error, err);
    }

    fn write(&self, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %self.key, error = %err, "persistent: failed to encode value");
                self.report(ControllerError::Serialization {
                    key: self.key.clone(),
                    reason: err.to_string(),
                });
                return;
            }
        };
        if let Err(err) = self.store.set(&self.key, &raw) {
            warn!(key = %self.key, error = %err, "persistent: store write failed; memory and store diverge");
            self.report(ControllerError::StorageWrite {
                key: self.key.clone(),
                reason: err.to_string(),
            });
        }
    }

    fn write_current(&self) {
        let value = self.value.lock().clone();
        self.write(&value);
    }

    /// Replaces the in-memory value and notifies when it actually changed.
    fn replace(&self, next: T) {
        let changed = {
            let mut value = self.value.lock();
            if *value == next {
                false
            } else {
                *value = next.clone();
                true
            }
        };
        if changed {
            self.observers.notify(&next);
        }
    }

    fn apply_external(&self, event: StorageEvent) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if event.origin == self.store.context_id()
            || event.scope != self.store.scope()
            || event.key != self.key
        {
            return;
        }
        match event.new_value {
            None => {
                debug!(key = %self.key, origin = event.origin, "persistent: removed in another context");
                self.replace(self.initial.clone());
            }
            Some(raw) => match decode(&self.key, &raw, self.validator.as_ref()) {
                Ok(next) => {
                    debug!(key = %self.key, origin = event.origin, "persistent: synced external write");
                    self.replace(next);
                }
                Err(err) => {
                    warn!(key = %self.key, origin = event.origin, error = %err, "persistent: ignoring external value");
                    self.report(err);
                }
            },
        }
    }

    /// Re-reads the store after missed change events.
    fn resync(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        match load(&self.key, self.store.as_ref(), self.validator.as_ref()) {
            Ok(Some(next)) => self.replace(next),
            Ok(None) => self.replace(self.initial.clone()),
            Err(err) => {
                warn!(key = %self.key, error = %err, "persistent: resync failed");
                self.report(err);
            }
        }
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.get_mut().take() {
            task.abort();
        }
    }
}

fn report(on_error: &Option<ErrorCallback>, err: ControllerError) {
    if let Some(callback) = on_error {
        callback(&err);
    }
}

fn decode<T: DeserializeOwned>(
    key: &str,
    raw: &str,
    validator: Option<&Validator<T>>,
) -> Result<T, ControllerError> {
    let value: T = serde_json::from_str(raw).map_err(|err| ControllerError::Serialization {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    if let Some(validator) = validator {
        if !validator(&value) {
            return Err(ControllerError::Validation {
                key: key.to_string(),
            });
        }
    }
    Ok(value)
}

fn load<T: DeserializeOwned>(
    key: &str,
    store: &dyn KeyValueStore,
    validator: Option<&Validator<T>>,
) -> Result<Option<T>, ControllerError> {
    let raw = store.get(key).map_err(|err| ControllerError::StorageRead {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    raw.map(|raw| decode(key, &raw, validator)).transpose()
}

/// A typed value persisted under one storage key.
pub struct PersistentCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for PersistentCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PersistentCell<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    /// Reads `key` from `store`, falling back to `initial` when the entry is
    /// missing, unreadable or invalid. The fallback is not written back.
    ///
    /// Cross-context sync starts only when called inside a tokio runtime.
    /// Without one, `set_value` ignores `write_delay` and writes immediately.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        initial: T,
        options: PersistOptions<T>,
    ) -> Self {
        let key = match &options.key_prefix {
            Some(prefix) => format!("{prefix}{}", key.into()),
            None => key.into(),
        };

        let loaded = match load(&key, store.as_ref(), options.validator.as_ref()) {
            Ok(Some(value)) => value,
            Ok(None) => initial.clone(),
            Err(err) => {
                warn!(key = %key, error = %err, "persistent: using initial value");
                report(&options.on_error, err);
                initial.clone()
            }
        };

        let receiver = if options.sync_across_contexts {
            store.subscribe()
        } else {
            None
        };

        let inner = Arc::new_cyclic(|weak: &Weak<CellInner<T>>| {
            let writer = options.write_delay.map(|delay| {
                let weak = weak.clone();
                Debouncer::new(DebounceOptions::new(delay), move |()| {
                    if let Some(inner) = weak.upgrade() {
                        inner.write_current();
                    }
                })
            });
            CellInner {
                key,
                store,
                initial,
                validator: options.validator.clone(),
                on_error: options.on_error.clone(),
                value: Mutex::new(loaded),
                observers: Observers::new(),
                writer,
                sync_task: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }
        });

        if let Some(receiver) = receiver {
            match Handle::try_current() {
                Ok(handle) => {
                    let task = handle.spawn(sync_loop(Arc::downgrade(&inner), receiver));
                    *inner.sync_task.lock() = Some(task);
                }
                Err(_) => {
                    warn!(key = %inner.key, "persistent: no tokio runtime; cross-context sync disabled");
                }
            }
        }

        info!(key = %inner.key, scope = ?inner.store.scope(), "persistent: cell ready");
        Self { inner }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn scope(&self) -> StorageScope {
        self.inner.store.scope()
    }

    pub fn value(&self) -> T {
        self.inner.value.lock().clone()
    }

    pub fn initial_value(&self) -> &T {
        &self.inner.initial
    }

    pub fn set_value(&self, value: T) {
        if self.inner.disposed.load(Ordering::Acquire) {
            debug!(key = %self.inner.key, "persistent: set after dispose ignored");
            return;
        }
        self.inner.replace(value.clone());
        match &self.inner.writer {
            Some(writer) if Handle::try_current().is_ok() => writer.call(()),
            Some(_) => {
                debug!(key = %self.inner.key, "persistent: no runtime for delayed write, writing now");
                self.inner.write(&value);
            }
            None => self.inner.write(&value),
        }
    }

    /// Updater form of [`PersistentCell::set_value`].
    pub fn update(&self, updater: impl FnOnce(&T) -> T) {
        let current = self.value();
        self.set_value(updater(&current));
    }

    /// Resets to the initial value and deletes the store entry.
    pub fn remove_value(&self) {
        if self.inner.disposed.load(Ordering::Acquire) {
            return;
        }
        if let Some(writer) = &self.inner.writer {
            writer.cancel();
        }
        self.inner.replace(self.inner.initial.clone());
        if let Err(err) = self.inner.store.remove(&self.inner.key) {
            warn!(key = %self.inner.key, error = %err, "persistent: store remove failed");
            self.inner.report(ControllerError::StorageWrite {
                key: self.inner.key.clone(),
                reason: err.to_string(),
            });
        }
    }

    pub fn on_change(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.inner.observers.subscribe(callback)
    }

    /// Whether a delayed write has not reached the store yet.
    pub fn write_pending(&self) -> bool {
        self.inner
            .writer
            .as_ref()
            .is_some_and(|writer| writer.pending())
    }
}

async fn sync_loop<T>(cell: Weak<CellInner<T>>, receiver: broadcast::Receiver<StorageEvent>)
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    let mut events = BroadcastStream::new(receiver);
    while let Some(event) = events.next().await {
        let Some(inner) = cell.upgrade() else {
            break;
        };
        match event {
            Ok(event) => inner.apply_external(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(key = %inner.key, skipped, "persistent: change feed lagged; re-reading store");
                inner.resync();
            }
        }
    }
}

impl<T> Dispose for PersistentCell<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(writer) = &self.inner.writer {
            writer.flush();
            writer.dispose();
        }
        if let Some(task) = self.inner.sync_task.lock().take() {
            task.abort();
        }
        self.inner.observers.clear();
        debug!(key = %self.inner.key, "persistent: disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "tests/persistent_tests.rs"]
mod tests;
