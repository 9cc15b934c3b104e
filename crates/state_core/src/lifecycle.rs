//! Host-agnostic attach/detach contract.
//!
//! A [`Scope`] stands in for whatever owns the controllers (a UI screen, a CLI
//! session, a request handler). Detaching it disposes everything attached, in
//! reverse attach order.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

pub trait Dispose: Send + Sync {
    /// Releases timers and in-flight work. Must be idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

pub struct Scope {
    name: String,
    attached: Mutex<Vec<Arc<dyn Dispose>>>,
    detached: AtomicBool,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attached: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ties `controller` to this scope and hands it back. Attaching to a scope
    /// that is already detached disposes the controller straight away.
    pub fn attach<D>(&self, controller: D) -> D
    where
        D: Dispose + Clone + 'static,
    {
        if self.detached.load(Ordering::Acquire) {
            debug!(scope = %self.name, "scope: attach after detach; disposing immediately");
            controller.dispose();
            return controller;
        }
        self.attached.lock().push(Arc::new(controller.clone()));
        controller
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        let attached = std::mem::take(&mut *self.attached.lock());
        info!(scope = %self.name, controllers = attached.len(), "scope: detaching");
        for controller in attached.into_iter().rev() {
            controller.dispose();
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Per-invocation cancellation marker. Clones observe the same flag.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.flag.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
