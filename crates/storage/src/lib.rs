//! Key-value storage backends for persisted controller state.
//!
//! Controllers never talk to a global store; they receive an
//! `Arc<dyn KeyValueStore>` and stay agnostic of where values end up.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use shared::domain::StorageScope;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Identifies one execution context (a tab, a window, a process) attached to a
/// shared storage area.
pub type ContextId = u64;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage read failed for key '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("storage write failed for key '{key}': {reason}")]
    Write { key: String, reason: String },
    #[error("storage quota of {quota} bytes exceeded writing key '{key}' ({needed} bytes needed)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
}

impl StorageError {
    pub fn key(&self) -> &str {
        match self {
            StorageError::Read { key, .. }
            | StorageError::Write { key, .. }
            | StorageError::QuotaExceeded { key, .. } => key,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, StorageError::Read { .. })
    }
}

/// Change notification for one key. `new_value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub scope: StorageScope,
    pub key: String,
    pub new_value: Option<String>,
    pub origin: ContextId,
}

/// Storage backend contract.
///
/// Change channels deliver writes from every context sharing the area, including
/// the subscriber's own; consumers skip events whose `origin` equals
/// [`KeyValueStore::context_id`].
pub trait KeyValueStore: Send + Sync {
    fn scope(&self) -> StorageScope;
    fn context_id(&self) -> ContextId;
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Backends without change notifications return `None`.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }
}

struct SharedArea {
    entries: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    next_context: AtomicU64,
    quota_bytes: Option<usize>,
}

/// In-process storage area. Every handle returned by [`MemoryStore::context`]
/// shares the same entries but writes under its own [`ContextId`], which makes it
/// usable as a stand-in for several browser tabs over one origin.
#[derive(Clone)]
pub struct MemoryStore {
    area: Arc<SharedArea>,
    scope: StorageScope,
    context: ContextId,
}

impl MemoryStore {
    pub fn new(scope: StorageScope) -> Self {
        Self::build(scope, None)
    }

    pub fn with_quota(scope: StorageScope, quota_bytes: usize) -> Self {
        Self::build(scope, Some(quota_bytes))
    }

    fn build(scope: StorageScope, quota_bytes: Option<usize>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            area: Arc::new(SharedArea {
                entries: Mutex::new(HashMap::new()),
                events,
                next_context: AtomicU64::new(1),
                quota_bytes,
            }),
            scope,
            context: 0,
        }
    }

    /// A new handle on the same area with a distinct context id.
    pub fn context(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            scope: self.scope,
            context: self.area.next_context.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.area.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.area.entries.lock().is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        used_bytes(&self.area.entries.lock())
    }

    fn emit(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine: nobody is listening for cross-context changes.
        let _ = self.area.events.send(StorageEvent {
            scope: self.scope,
            key: key.to_string(),
            new_value,
            origin: self.context,
        });
    }
}

fn used_bytes(entries: &HashMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl KeyValueStore for MemoryStore {
    fn scope(&self) -> StorageScope {
        self.scope
    }

    fn context_id(&self) -> ContextId {
        self.context
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.area.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let mut entries = self.area.entries.lock();
            if entries.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            if let Some(quota) = self.area.quota_bytes {
                let current = used_bytes(&entries);
                let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
                let needed = current - replaced + key.len() + value.len();
                if needed > quota {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        quota,
                    });
                }
            }
            entries.insert(key.to_string(), value.to_string());
        }
        debug!(key, context = self.context, "storage: set");
        self.emit(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let existed = self.area.entries.lock().remove(key).is_some();
        if existed {
            debug!(key, context = self.context, "storage: removed");
            self.emit(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.area.events.subscribe())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
