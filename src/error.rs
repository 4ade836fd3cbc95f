//! Error types for the outbox engine.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
///
/// Only [`OutboxError::EnqueueFailure`] is meant to propagate out of the engine into
/// application code (it surfaces from the enqueuer so the caller's business transaction
/// can roll back). Every other variant is produced and consumed internally by the
/// processor.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed.
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Message not found in the outbox.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Failed to publish message to the message broker.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// `append` could not be committed with the caller's business transaction.
    #[error("enqueue failed: {0}")]
    EnqueueFailure(String),

    /// Configuration was invalid (e.g. `backoffMultiplier <= 1.0`).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with context.
    #[error("outbox error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Maximum length of a stored `lastError` reason (bounded string, see data model).
pub const MAX_REASON_LEN: usize = 512;

/// Truncate a failure reason to [`MAX_REASON_LEN`] characters on a char boundary.
///
/// Stack traces are never stored; callers pass `error.to_string()`, not `{:?}`.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    reason.chars().take(MAX_REASON_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_reasons() {
        let long = "x".repeat(1000);
        let truncated = truncate_reason(&long);
        assert_eq!(truncated.chars().count(), MAX_REASON_LEN);
    }

    #[test]
    fn leaves_short_reasons_untouched() {
        assert_eq!(truncate_reason("timeout"), "timeout");
    }
}
