pub mod domain;
pub mod error;

pub use domain::{Breakpoint, OperationStatus, StorageScope, Viewport};
pub use error::{ControllerError, ErrorKind, ErrorReport};
