//! Error types for broker operations.
//!
//! This module provides:
//! - `BrokerError` - the main error type surfaced by the Job Broker and Worker Registry
//! - `ErrorCategory` - classification used to decide whether a failure is worth logging loudly

use thiserror::Error;

/// Errors that can occur while operating the job queue.
///
/// Validation and conflict outcomes are deliberately NOT errors: `claim`
/// returning `false` or `cancel` on a terminal job are truthful return
/// values, not failures. This type exists for failures the caller cannot
/// reason about from the return value alone.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("invalid job record: {0}")]
    InvalidRecord(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    /// Classify this error for logging and alerting purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("connection")
                    || msg.contains("disconnected")
                    || msg.contains("broken pipe")
                    || msg.contains("timed out")
                    || msg.contains("timeout")
                {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Internal
                }
            }
            Self::Serialization(_) | Self::InvalidRecord(_) => ErrorCategory::Contract,
            Self::JobNotFound(_) | Self::WorkerNotFound(_) => ErrorCategory::NotFound,
            Self::Config(_) => ErrorCategory::Internal,
        }
    }
}

/// Error category, used to decide log level and whether an operation is
/// worth retrying at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Store connectivity issue; callers may retry.
    Transient,
    /// Referenced entity does not exist.
    NotFound,
    /// Stored data did not match the expected shape.
    Contract,
    /// Anything else; logged as a bug, not retried.
    Internal,
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_categorizes_as_not_found() {
        let err = BrokerError::JobNotFound("abc".into());
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn bad_record_categorizes_as_contract() {
        let err = BrokerError::InvalidRecord("missing status field".into());
        assert_eq!(err.category(), ErrorCategory::Contract);
    }
}
