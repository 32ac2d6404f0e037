//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::clock::TimestampMs;

/// Errors produced by scheduler components.
///
/// Errors are `Clone` so that a single batch-wide failure can be handed to
/// every operation that took part in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The caller cancelled before the operation was admitted into a batch.
    #[error("operation cancelled before admission")]
    Cancelled,
    /// The batch collector no longer accepts operations.
    #[error("batch collector is closed")]
    Closed,
    /// A single operation failed; siblings in the batch are unaffected.
    #[error("operation failed: {0}")]
    Operation(String),
    /// The transaction carrying a whole batch failed.
    #[error("transaction failed: {0}")]
    Transaction(String),
    /// Durable event flush failed, failing the batch.
    #[error("event flush failed: {0}")]
    Flush(String),
    /// The scheduler clock was asked to move backwards.
    #[error("update time {next} is older than scheduler time {previous}")]
    UpdateOrder {
        /// Current scheduler time.
        previous: TimestampMs,
        /// Rejected update time.
        next: TimestampMs,
    },
    /// A caller-supplied value was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The batch loop stopped before reporting the operation's outcome.
    #[error("operation abandoned before its batch reported a result")]
    Abandoned,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// True when the error was produced for the whole batch rather than one operation.
    #[must_use]
    pub const fn is_batch_wide(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Flush(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
