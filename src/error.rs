//! Error types and handling for FleetMender
//!
//! The taxonomy mirrors how failures are handled, not where they occur:
//! transient infrastructure errors are retried at the call site, step
//! failures feed the rollback path, planning gaps become manual plans,
//! and notification failures are logged and dropped. Tests assert on the
//! category, so variants stay coarse and stable.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for FleetMender operations
pub type Result<T> = std::result::Result<T, Error>;

/// FleetMender error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    #[error("metrics backend unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("recovery step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("recovery step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },

    #[error("operator rejected step '{0}'")]
    StepRejected(String),

    #[error("no recovery catalog entry for incident type '{0}'")]
    Planning(String),

    #[error("notification via '{channel}' failed: {reason}")]
    Notification { channel: String, reason: String },

    #[error("platform operation failed: {0}")]
    Platform(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation criteria '{0}' is not machine-checkable")]
    Criteria(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the retry layer should re-attempt the failed call.
    ///
    /// Only infrastructure-level failures qualify; semantic failures
    /// (a failed step, a rejected approval) must never be retried
    /// blindly.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::MetricsUnavailable(_))
    }
}
