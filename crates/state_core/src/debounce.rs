//! Input-rate smoothing.
//!
//! [`Debouncer`] is the callback form: `call` is the rate-limited wrapper around
//! the supplied function. [`DebouncedValue`] is the value form built on top of it.
//!
//! A window opens with the first call while no delay timer is armed and closes
//! when the delay timer fires. At most one delay timer and one max-wait timer are
//! armed per instance; arming a timer aborts the previous one of the same kind.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::debug;

use crate::{
    lifecycle::Dispose,
    observer::{Observers, Subscription},
};

const DEFAULT_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceOptions {
    pub delay: Duration,
    /// Invoke on the first call of a window.
    pub leading: bool,
    /// Invoke with the last call's arguments once the window closes.
    pub trailing: bool,
    /// Upper bound between invocations while calls keep arriving.
    pub max_wait: Option<Duration>,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

impl DebounceOptions {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn leading(mut self, enabled: bool) -> Self {
        self.leading = enabled;
        self
    }

    pub fn trailing(mut self, enabled: bool) -> Self {
        self.trailing = enabled;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Max-wait bound as armed: never shorter than `delay`.
    pub fn effective_max_wait(&self) -> Option<Duration> {
        self.max_wait.map(|max_wait| max_wait.max(self.delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Delay,
    MaxWait,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn abort(self) {
        self.handle.abort();
    }
}

struct DebounceState<A> {
    pending_args: Option<A>,
    last_call: Option<Instant>,
    last_invoke: Option<Instant>,
    timer: Option<Timer>,
    max_wait_timer: Option<Timer>,
    next_timer_id: u64,
    disposed: bool,
}

impl<A> DebounceState<A> {
    fn clear_timers(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.max_wait_timer.take() {
            timer.abort();
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Timer> {
        match kind {
            TimerKind::Delay => &mut self.timer,
            TimerKind::MaxWait => &mut self.max_wait_timer,
        }
    }
}

struct DebounceInner<A> {
    callback: Arc<dyn Fn(A) + Send + Sync>,
    options: DebounceOptions,
    state: Mutex<DebounceState<A>>,
}

impl<A: Send + 'static> DebounceInner<A> {
    fn arm(self: &Arc<Self>, state: &mut DebounceState<A>, kind: TimerKind, after: Duration) {
        if let Some(previous) = state.slot(kind).take() {
            previous.abort();
        }
        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let inner = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            sleep(after).await;
            if let Some(inner) = inner.upgrade() {
                inner.on_timer(kind, id);
            }
        });
        *state.slot(kind) = Some(Timer { id, handle });
    }

    fn on_timer(self: &Arc<Self>, kind: TimerKind, id: u64) {
        let args = {
            let mut state = self.state.lock();
            if state.disposed || state.slot(kind).as_ref().map(|timer| timer.id) != Some(id) {
                return;
            }
            // This task is the one firing; dropping its handle detaches it.
            state.slot(kind).take();
            match kind {
                TimerKind::Delay => {
                    if let Some(timer) = state.max_wait_timer.take() {
                        timer.abort();
                    }
                    let args = state.pending_args.take();
                    if self.options.trailing {
                        args
                    } else {
                        None
                    }
                }
                TimerKind::MaxWait => {
                    let args = state.pending_args.take();
                    if state.timer.is_some() {
                        if let Some(max_wait) = self.options.effective_max_wait() {
                            self.arm(&mut state, TimerKind::MaxWait, max_wait);
                        }
                    }
                    args
                }
            }
        };

        if let Some(args) = args {
            debug!(timer = ?kind, "debounce: invoking");
            self.state.lock().last_invoke = Some(Instant::now());
            (self.callback)(args);
        }
    }
}

impl<A> Drop for DebounceInner<A> {
    fn drop(&mut self) {
        self.state.get_mut().clear_timers();
    }
}

/// Rate-limited wrapper around a callback. Must be driven from within a tokio
/// runtime since timers run as spawned tasks.
pub struct Debouncer<A> {
    inner: Arc<DebounceInner<A>>,
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Send + 'static> Debouncer<A> {
    pub fn new(options: DebounceOptions, callback: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                callback: Arc::new(callback),
                options,
                state: Mutex::new(DebounceState {
                    pending_args: None,
                    last_call: None,
                    last_invoke: None,
                    timer: None,
                    max_wait_timer: None,
                    next_timer_id: 0,
                    disposed: false,
                }),
            }),
        }
    }

    pub fn options(&self) -> DebounceOptions {
        self.inner.options
    }

    pub fn call(&self, args: A) {
        let options = self.inner.options;
        let invoke_now = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            let now = Instant::now();
            state.last_call = Some(now);
            let window_open = state.timer.is_some();
            self.inner.arm(&mut state, TimerKind::Delay, options.delay);

            if window_open {
                state.pending_args = Some(args);
                None
            } else {
                if let Some(max_wait) = options.effective_max_wait() {
                    self.inner.arm(&mut state, TimerKind::MaxWait, max_wait);
                }
                if options.leading {
                    state.pending_args = None;
                    state.last_invoke = Some(now);
                    Some(args)
                } else {
                    state.pending_args = Some(args);
                    None
                }
            }
        };

        if let Some(args) = invoke_now {
            debug!("debounce: leading invocation");
            (self.inner.callback)(args);
        }
    }

    /// Drops the scheduled invocation and all timers without invoking.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.clear_timers();
        state.pending_args = None;
        state.last_call = None;
    }

    /// Runs the scheduled trailing invocation now. Returns whether one ran.
    pub fn flush(&self) -> bool {
        let args = {
            let mut state = self.inner.state.lock();
            if state.disposed || !self.inner.options.trailing || state.timer.is_none() {
                return false;
            }
            let Some(args) = state.pending_args.take() else {
                return false;
            };
            state.clear_timers();
            state.last_invoke = Some(Instant::now());
            args
        };
        debug!("debounce: flushed");
        (self.inner.callback)(args);
        true
    }

    /// Whether a trailing invocation is scheduled.
    pub fn pending(&self) -> bool {
        let state = self.inner.state.lock();
        self.inner.options.trailing && state.timer.is_some() && state.pending_args.is_some()
    }

    pub fn last_call(&self) -> Option<Instant> {
        self.inner.state.lock().last_call
    }

    pub fn last_invoke(&self) -> Option<Instant> {
        self.inner.state.lock().last_invoke
    }
}

impl<A: Send + 'static> Dispose for Debouncer<A> {
    fn dispose(&self) {
        let mut state = self.inner.state.lock();
        state.disposed = true;
        state.clear_timers();
        state.pending_args = None;
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }
}

/// A value that settles `delay` after its input stops changing.
pub struct DebouncedValue<T> {
    input: Arc<Mutex<T>>,
    settled: Arc<Mutex<T>>,
    debouncer: Debouncer<T>,
    observers: Observers<T>,
}

impl<T> Clone for DebouncedValue<T> {
    fn clone(&self) -> Self {
        Self {
            input: Arc::clone(&self.input),
            settled: Arc::clone(&self.settled),
            debouncer: self.debouncer.clone(),
            observers: self.observers.clone(),
        }
    }
}

impl<T> DebouncedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T, delay: Duration) -> Self {
        Self::with_options(initial, DebounceOptions::new(delay))
    }

    pub fn with_options(initial: T, options: DebounceOptions) -> Self {
        let settled = Arc::new(Mutex::new(initial.clone()));
        let observers = Observers::new();

        let target = Arc::clone(&settled);
        let notify = observers.clone();
        let debouncer = Debouncer::new(options, move |value: T| {
            {
                let mut current = target.lock();
                if *current == value {
                    return;
                }
                *current = value.clone();
            }
            notify.notify(&value);
        });

        Self {
            input: Arc::new(Mutex::new(initial)),
            settled,
            debouncer,
            observers,
        }
    }

    pub fn set(&self, value: T) {
        *self.input.lock() = value.clone();
        self.debouncer.call(value);
    }

    /// The settled value.
    pub fn value(&self) -> T {
        self.settled.lock().clone()
    }

    /// The most recent input, settled or not.
    pub fn latest(&self) -> T {
        self.input.lock().clone()
    }

    pub fn pending(&self) -> bool {
        self.debouncer.pending()
    }

    pub fn flush(&self) -> bool {
        self.debouncer.flush()
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
    }

    pub fn on_change(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.observers.subscribe(callback)
    }
}

impl<T> Dispose for DebouncedValue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        self.debouncer.dispose();
        self.observers.clear();
    }

    fn is_disposed(&self) -> bool {
        self.debouncer.is_disposed()
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
