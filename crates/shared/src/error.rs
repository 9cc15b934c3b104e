use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Serialization,
    StorageRead,
    StorageWrite,
    Timeout,
    Cancelled,
    RetryExhausted,
    CapacityExceeded,
    InvalidState,
    Operation,
}

#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    #[error("value for key '{key}' failed validation")]
    Validation { key: String },
    #[error("failed to (de)serialize value for key '{key}': {reason}")]
    Serialization { key: String, reason: String },
    #[error("failed to read key '{key}' from storage: {reason}")]
    StorageRead { key: String, reason: String },
    #[error("failed to write key '{key}' to storage: {reason}")]
    StorageWrite { key: String, reason: String },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ControllerError>,
    },
    #[error("selection limit of {limit} reached ({requested} requested)")]
    CapacityExceeded { limit: usize, requested: usize },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("operation failed: {0}")]
    Operation(Arc<anyhow::Error>),
}

impl ControllerError {
    pub fn operation(err: anyhow::Error) -> Self {
        Self::Operation(Arc::new(err))
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Validation { .. } => ErrorKind::Validation,
            ControllerError::Serialization { .. } => ErrorKind::Serialization,
            ControllerError::StorageRead { .. } => ErrorKind::StorageRead,
            ControllerError::StorageWrite { .. } => ErrorKind::StorageWrite,
            ControllerError::Timeout(_) => ErrorKind::Timeout,
            ControllerError::Cancelled => ErrorKind::Cancelled,
            ControllerError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ControllerError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            ControllerError::InvalidState(_) => ErrorKind::InvalidState,
            ControllerError::Operation(_) => ErrorKind::Operation,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ControllerError::Cancelled)
    }

    /// The failure that ended the last attempt, unwrapping retry exhaustion.
    pub fn root(&self) -> &ControllerError {
        match self {
            ControllerError::RetryExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// Serializable summary of a [`ControllerError`] for hosts that forward errors
/// across a process or UI boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ControllerError> for ErrorReport {
    fn from(value: &ControllerError) -> Self {
        Self {
            kind: value.kind(),
            message: value.to_string(),
        }
    }
}
