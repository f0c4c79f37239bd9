//! Error types shared across the Trackflow services
//!
//! The taxonomy mirrors how failures propagate through the pipeline:
//! `Validation` and `NotFound` surface to synchronous callers and are never
//! retried; `Transient` marks infrastructure blips that retry policies may
//! absorb; `Terminal` is what a transient error becomes once its retries are
//! exhausted. Event handlers never let any of these cross the bus boundary.

use thiserror::Error;

/// Result type alias for Trackflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for Trackflow
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient infrastructure error: {0}")]
    Transient(String),

    #[error("Terminal failure: {0}")]
    Terminal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Whether a retry policy is allowed to re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::Transient(_))
    }

    /// Escalate a transient error into the terminal failure produced when
    /// retries are exhausted. Non-transient errors pass through unchanged.
    pub fn into_terminal(self) -> FlowError {
        match self {
            FlowError::Transient(msg) => FlowError::Terminal(msg),
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(FlowError::Transient("s3 timeout".into()).is_retryable());
        assert!(!FlowError::Validation("bad id".into()).is_retryable());
        assert!(!FlowError::Terminal("gave up".into()).is_retryable());
    }

    #[test]
    fn transient_escalates_to_terminal() {
        let err = FlowError::Transient("connection reset".into()).into_terminal();
        assert!(matches!(err, FlowError::Terminal(_)));

        let err = FlowError::NotFound("resource 7".into()).into_terminal();
        assert!(matches!(err, FlowError::NotFound(_)));
    }
}
