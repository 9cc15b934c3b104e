//! Host-agnostic state controllers: async operations, debouncing, selection,
//! responsive breakpoints and persisted cells.
//!
//! Every controller is a cheap `Clone` handle, publishes changes through
//! `on_change` subscriptions and implements [`Dispose`] so a [`Scope`] can tear
//! it down deterministically.

pub mod async_operation;
pub mod config;
pub mod debounce;
pub mod lifecycle;
pub mod observer;
pub mod persistent;
pub mod responsive;
pub mod selection;
pub mod viewport;

pub use async_operation::{AsyncOperation, AsyncOptions, OperationRecord, RemoteOperation};
pub use config::{load_settings, Settings};
pub use debounce::{DebounceOptions, DebouncedValue, Debouncer};
pub use lifecycle::{CancelToken, Dispose, Scope};
pub use observer::{ErrorCallback, Observers, Subscription};
pub use persistent::{PersistOptions, PersistentCell};
pub use responsive::{
    BreakpointConfig, Dimensions, DimensionsConfig, FlexConfig, FlexDirection, FlexProps, Length,
    ResponsiveDefaults, ResponsiveResolver, ResponsiveValue, Visibility,
};
pub use selection::{SelectionChange, SelectionManager, SelectionOptions, SelectionStats};
pub use viewport::{BreakpointSource, BreakpointThresholds, ViewportTracker};

pub use shared::{Breakpoint, ControllerError, ErrorKind, OperationStatus, StorageScope, Viewport};
