//! Breakpoint sources.
//!
//! The core never measures anything. A host feeds viewport sizes into a
//! [`ViewportTracker`] (or implements [`BreakpointSource`] itself) and listeners
//! are told synchronously whenever the breakpoint label changes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::domain::{Breakpoint, Viewport};
use tracing::debug;

use crate::observer::{Observers, Subscription};

pub type BreakpointListener = Box<dyn Fn(Breakpoint) + Send + Sync>;

pub trait BreakpointSource: Send + Sync {
    fn current(&self) -> Breakpoint;

    fn viewport(&self) -> Viewport;

    /// Registers `listener` for label changes. It is called on the thread that
    /// reported the change, before that call returns.
    fn on_change(&self, listener: BreakpointListener) -> Subscription;
}

/// Minimum widths, in px, at which each breakpoint starts. `xs` starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointThresholds {
    pub sm: u32,
    pub md: u32,
    pub lg: u32,
    pub xl: u32,
}

impl Default for BreakpointThresholds {
    fn default() -> Self {
        Self {
            sm: 600,
            md: 960,
            lg: 1280,
            xl: 1920,
        }
    }
}

impl BreakpointThresholds {
    pub fn classify(&self, width: u32) -> Breakpoint {
        if width >= self.xl {
            Breakpoint::Xl
        } else if width >= self.lg {
            Breakpoint::Lg
        } else if width >= self.md {
            Breakpoint::Md
        } else if width >= self.sm {
            Breakpoint::Sm
        } else {
            Breakpoint::Xs
        }
    }

    pub fn min_width(&self, breakpoint: Breakpoint) -> u32 {
        match breakpoint {
            Breakpoint::Xs => 0,
            Breakpoint::Sm => self.sm,
            Breakpoint::Md => self.md,
            Breakpoint::Lg => self.lg,
            Breakpoint::Xl => self.xl,
        }
    }

    /// Thresholds must strictly increase from `sm` to `xl`.
    pub fn is_ordered(&self) -> bool {
        0 < self.sm && self.sm < self.md && self.md < self.lg && self.lg < self.xl
    }
}

struct TrackerState {
    viewport: Viewport,
    breakpoint: Breakpoint,
}

struct TrackerInner {
    thresholds: BreakpointThresholds,
    state: Mutex<TrackerState>,
    observers: Observers<Breakpoint>,
}

/// Classifies host-reported viewport sizes into breakpoints.
#[derive(Clone)]
pub struct ViewportTracker {
    inner: Arc<TrackerInner>,
}

impl ViewportTracker {
    pub fn new(thresholds: BreakpointThresholds, viewport: Viewport) -> Self {
        let breakpoint = thresholds.classify(viewport.width);
        Self {
            inner: Arc::new(TrackerInner {
                thresholds,
                state: Mutex::new(TrackerState {
                    viewport,
                    breakpoint,
                }),
                observers: Observers::new(),
            }),
        }
    }

    pub fn thresholds(&self) -> BreakpointThresholds {
        self.inner.thresholds
    }

    /// Records a new viewport size. Returns whether the breakpoint changed;
    /// listeners have already run when it returns `true`.
    pub fn resize(&self, viewport: Viewport) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            state.viewport = viewport;
            let next = self.inner.thresholds.classify(viewport.width);
            if next == state.breakpoint {
                None
            } else {
                let previous = std::mem::replace(&mut state.breakpoint, next);
                Some((previous, next))
            }
        };

        match changed {
            Some((previous, next)) => {
                debug!(%previous, %next, width = viewport.width, "viewport: breakpoint changed");
                self.inner.observers.notify(&next);
                true
            }
            None => false,
        }
    }
}

impl BreakpointSource for ViewportTracker {
    fn current(&self) -> Breakpoint {
        self.inner.state.lock().breakpoint
    }

    fn viewport(&self) -> Viewport {
        self.inner.state.lock().viewport
    }

    fn on_change(&self, listener: BreakpointListener) -> Subscription {
        self.inner
            .observers
            .subscribe(move |breakpoint: &Breakpoint| listener(*breakpoint))
    }
}
