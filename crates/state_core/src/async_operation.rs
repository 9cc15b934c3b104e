//! Lifecycle controller for one logical asynchronous operation.
//!
//! Every `execute` opens a new generation. Only the newest generation may
//! write to the snapshot; older invocations are cancelled through their
//! [`CancelToken`] and anything they produce afterwards is dropped.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{domain::OperationStatus, error::ControllerError};
use tracing::{debug, warn};

use crate::{
    lifecycle::{CancelToken, Dispose},
    observer::{ErrorCallback, Observers, Subscription},
};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// The unit of work an [`AsyncOperation`] drives, typically a REST call.
#[async_trait]
pub trait RemoteOperation<A, T>: Send + Sync {
    async fn run(&self, args: A) -> anyhow::Result<T>;
}

#[async_trait]
impl<A, T, F, Fut> RemoteOperation<A, T> for F
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    A: Send + 'static,
    T: Send + 'static,
{
    async fn run(&self, args: A) -> anyhow::Result<T> {
        (self)(args).await
    }
}

#[derive(Debug, Clone)]
pub struct OperationRecord<T> {
    pub data: Option<T>,
    pub error: Option<ControllerError>,
    pub status: OperationStatus,
    pub attempt: u32,
}

impl<T> OperationRecord<T> {
    fn initial(data: Option<T>) -> Self {
        Self {
            data,
            error: None,
            status: OperationStatus::Idle,
            attempt: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == OperationStatus::Pending
    }
}

pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Clone)]
pub struct AsyncOptions<T> {
    pub timeout: Option<Duration>,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub reset_on_execute: bool,
    pub throw_on_error: bool,
    pub initial_data: Option<T>,
    pub on_success: Option<SuccessCallback<T>>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> Default for AsyncOptions<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_count: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            reset_on_execute: false,
            throw_on_error: false,
            initial_data: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> AsyncOptions<T> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay = delay;
        self
    }

    pub fn reset_on_execute(mut self, enabled: bool) -> Self {
        self.reset_on_execute = enabled;
        self
    }

    pub fn throw_on_error(mut self, enabled: bool) -> Self {
        self.throw_on_error = enabled;
        self
    }

    pub fn with_initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ControllerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

struct OperationState<A, T> {
    record: OperationRecord<T>,
    generation: u64,
    active: Option<CancelToken>,
    last_args: Option<A>,
    disposed: bool,
}

struct Inner<A, T> {
    operation: Arc<dyn RemoteOperation<A, T>>,
    options: AsyncOptions<T>,
    state: Mutex<OperationState<A, T>>,
    observers: Observers<OperationRecord<T>>,
}

/// Cheap to clone; clones drive the same snapshot.
pub struct AsyncOperation<A, T> {
    inner: Arc<Inner<A, T>>,
}

impl<A, T> Clone for AsyncOperation<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> AsyncOperation<A, T>
where
    A: Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(operation: impl RemoteOperation<A, T> + 'static, options: AsyncOptions<T>) -> Self {
        let record = OperationRecord::initial(options.initial_data.clone());
        Self {
            inner: Arc::new(Inner {
                operation: Arc::new(operation),
                options,
                state: Mutex::new(OperationState {
                    record,
                    generation: 0,
                    active: None,
                    last_args: None,
                    disposed: false,
                }),
                observers: Observers::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> OperationRecord<T> {
        self.inner.state.lock().record.clone()
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.state.lock().record.status
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.lock().record.data.clone()
    }

    pub fn error(&self) -> Option<ControllerError> {
        self.inner.state.lock().record.error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().record.is_loading()
    }

    pub fn on_change(
        &self,
        callback: impl Fn(&OperationRecord<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(callback)
    }

    /// Runs the operation, superseding any invocation still in flight.
    ///
    /// Resolves to `Ok(Some(data))` when this invocation commits a result. A
    /// failure, a cancellation or a supersede resolves to `Ok(None)` unless
    /// `throw_on_error` is set, in which case the error is returned.
    pub async fn execute(&self, args: A) -> Result<Option<T>, ControllerError> {
        let Some((generation, token, superseded, snapshot)) = self.begin(args.clone()) else {
            debug!("async operation: execute after dispose ignored");
            return self.quiet_failure(ControllerError::invalid_state("controller disposed"));
        };
        if superseded {
            debug!(generation, "async operation: superseded in-flight invocation");
            self.report(&ControllerError::Cancelled);
        }
        self.inner.observers.notify(&snapshot);
        self.run(generation, token, args).await
    }

    /// Re-runs the operation with the arguments of the last `execute`.
    pub async fn retry(&self) -> Result<Option<T>, ControllerError> {
        let last_args = self.inner.state.lock().last_args.clone();
        match last_args {
            Some(args) => self.execute(args).await,
            None => {
                warn!("async operation: retry requested before any invocation");
                let err = ControllerError::invalid_state("retry requires a previous invocation");
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Aborts the in-flight invocation, if any, and returns to `Idle`.
    pub fn cancel(&self) {
        let (cancelled, snapshot) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            let Some(token) = state.active.take() else {
                return;
            };
            token.cancel();
            state.generation += 1;
            state.record.status = OperationStatus::Idle;
            (state.generation, state.record.clone())
        };
        debug!(generation = cancelled, "async operation: cancelled");
        self.report(&ControllerError::Cancelled);
        self.inner.observers.notify(&snapshot);
    }

    /// Cancels in-flight work and restores the snapshot built at construction.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            if let Some(token) = state.active.take() {
                token.cancel();
            }
            state.generation += 1;
            state.last_args = None;
            state.record = OperationRecord::initial(self.inner.options.initial_data.clone());
            state.record.clone()
        };
        self.inner.observers.notify(&snapshot);
    }

    fn begin(&self, args: A) -> Option<(u64, CancelToken, bool, OperationRecord<T>)> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return None;
        }
        let superseded = match state.active.take() {
            Some(previous) => {
                previous.cancel();
                true
            }
            None => false,
        };
        state.generation += 1;
        let token = CancelToken::new();
        state.active = Some(token.clone());
        state.last_args = Some(args);
        if self.inner.options.reset_on_execute {
            state.record.data = self.inner.options.initial_data.clone();
        }
        state.record.error = None;
        state.record.status = OperationStatus::Pending;
        state.record.attempt = 0;
        Some((state.generation, token, superseded, state.record.clone()))
    }

    async fn run(
        &self,
        generation: u64,
        token: CancelToken,
        args: A,
    ) -> Result<Option<T>, ControllerError> {
        let options = &self.inner.options;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if !self.commit(generation, false, |record| record.attempt = attempt) {
                return self.quiet_failure(ControllerError::Cancelled);
            }
            debug!(generation, attempt, "async operation: attempt started");

            match self.attempt(&token, args.clone()).await {
                Ok(data) => {
                    let committed = self.commit(generation, true, |record| {
                        record.status = OperationStatus::Resolved;
                        record.data = Some(data.clone());
                        record.error = None;
                    });
                    if !committed {
                        return self.quiet_failure(ControllerError::Cancelled);
                    }
                    debug!(generation, attempt, "async operation: resolved");
                    if let Some(on_success) = &options.on_success {
                        on_success(&data);
                    }
                    return Ok(Some(data));
                }
                Err(err) if err.is_cancellation() => {
                    return self.quiet_failure(err);
                }
                Err(err) if attempt <= options.retry_count => {
                    warn!(
                        generation,
                        attempt,
                        max_attempts = options.retry_count + 1,
                        error = %err,
                        "async operation: attempt failed; retrying"
                    );
                    let proceed = tokio::select! {
                        biased;
                        _ = token.cancelled() => false,
                        _ = tokio::time::sleep(options.retry_delay) => true,
                    };
                    if !proceed {
                        return self.quiet_failure(ControllerError::Cancelled);
                    }
                }
                Err(err) => {
                    let error = if options.retry_count > 0 {
                        ControllerError::RetryExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    let committed = self.commit(generation, true, |record| {
                        record.status = OperationStatus::Rejected;
                        record.error = Some(error.clone());
                    });
                    if !committed {
                        return self.quiet_failure(ControllerError::Cancelled);
                    }
                    warn!(generation, attempt, error = %error, "async operation: rejected");
                    self.report(&error);
                    return self.quiet_failure(error);
                }
            }
        }
    }

    async fn attempt(&self, token: &CancelToken, args: A) -> Result<T, ControllerError> {
        let operation = Arc::clone(&self.inner.operation);
        let work = async move {
            operation
                .run(args)
                .await
                .map_err(ControllerError::operation)
        };
        let bounded = async {
            match self.inner.options.timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(ControllerError::Timeout(limit))),
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ControllerError::Cancelled),
            result = bounded => result,
        }
    }

    /// Applies `apply` only while `generation` is still the newest invocation.
    fn commit(
        &self,
        generation: u64,
        terminal: bool,
        apply: impl FnOnce(&mut OperationRecord<T>),
    ) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.disposed || state.generation != generation {
                return false;
            }
            apply(&mut state.record);
            if terminal {
                state.active = None;
            }
            state.record.clone()
        };
        self.inner.observers.notify(&snapshot);
        true
    }

    fn report(&self, error: &ControllerError) {
        if let Some(on_error) = &self.inner.options.on_error {
            on_error(error);
        }
    }

    fn quiet_failure(&self, error: ControllerError) -> Result<Option<T>, ControllerError> {
        if self.inner.options.throw_on_error {
            Err(error)
        } else {
            Ok(None)
        }
    }
}

impl<A, T> Dispose for AsyncOperation<A, T>
where
    A: Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.generation += 1;
            if let Some(token) = state.active.take() {
                token.cancel();
            }
        }
        self.inner.observers.clear();
        debug!("async operation: disposed");
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }
}

#[cfg(test)]
#[path = "tests/async_operation_tests.rs"]
mod tests;
