//! Error types for the job engine
//!
//! This module defines the error types used throughout the engine.
//! All errors implement the `std::error::Error` trait via `thiserror::Error`.
//!
//! # Error Handling
//!
//! The [`QueueError`] enum covers all possible error conditions:
//! - Configuration errors (duplicate processor registration, registering
//!   after initialization)
//! - Producer-facing errors (`QueueNotFound`, `ShutdownInProgress`)
//! - Execution errors (`HandlerExecution`, `Timeout`), which are recorded
//!   on the job and emitted as events, never returned to the producer that
//!   enqueued the job
//! - Infrastructure errors (`Storage`, `InvalidCron`)
//!
//! # Example
//!
//! ```rust,ignore
//! use jobmill::{JobOptions, QueueError};
//!
//! match manager.add_job("emails", "send-welcome", payload, JobOptions::default()).await {
//!     Ok(job_id) => { /* enqueued */ },
//!     Err(QueueError::QueueNotFound(name)) => {
//!         eprintln!("Queue '{}' is not registered", name);
//!     },
//!     Err(QueueError::ShutdownInProgress) => {
//!         eprintln!("Engine is shutting down");
//!     },
//!     Err(e) => {
//!         eprintln!("Unexpected error: {}", e);
//!     }
//! }
//! ```

use thiserror::Error;

use crate::job::JobId;

/// Job engine error type
///
/// Represents all possible errors that can occur in the engine.
///
/// # Variants
///
/// * `Configuration` - Invalid setup (duplicate processor, registration after init)
/// * `QueueNotFound` - The named queue has no registered processor
/// * `HandlerExecution` - A processor returned an error; carries the attempt number
/// * `Timeout` - A job exceeded its execution timeout
/// * `ShutdownInProgress` - The manager is shutting down and not accepting new jobs
/// * `Storage` - Backing store I/O or serialization failure
/// * `InvalidCron` - Unparseable recurring-schedule expression
/// * `Other` - Catch-all for unexpected errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Queue not found
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Handler execution error
    #[error("handler for job {job_id} failed on attempt {attempt}: {reason}")]
    HandlerExecution {
        job_id: JobId,
        attempt: u32,
        reason: String,
    },

    /// Job execution timeout
    #[error("job timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Shutdown in progress
    #[error("manager is shutting down, not accepting new jobs")]
    ShutdownInProgress,

    /// Backing store error
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid cron expression
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using QueueError
///
/// Convenience type alias for `std::result::Result<T, QueueError>`.
/// Used throughout the library for consistent error handling.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_queue_not_found_error() {
        let error = QueueError::QueueNotFound("emails".to_string());
        assert_eq!(error.to_string(), "queue not found: emails");
    }

    #[test]
    fn test_configuration_error() {
        let error = QueueError::Configuration("processor already registered".to_string());
        assert_eq!(
            error.to_string(),
            "configuration error: processor already registered"
        );
    }

    #[test]
    fn test_handler_execution_error() {
        let id = Uuid::nil();
        let error = QueueError::HandlerExecution {
            job_id: id,
            attempt: 2,
            reason: "smtp connect refused".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("attempt 2"));
        assert!(msg.contains("smtp connect refused"));
    }

    #[test]
    fn test_timeout_error() {
        let error = QueueError::Timeout(std::time::Duration::from_secs(5));
        assert_eq!(error.to_string(), "job timed out after 5s");
    }

    #[test]
    fn test_shutdown_in_progress_error() {
        let error = QueueError::ShutdownInProgress;
        assert_eq!(
            error.to_string(),
            "manager is shutting down, not accepting new jobs"
        );
    }

    #[test]
    fn test_invalid_cron_error() {
        let error = QueueError::InvalidCron("not-a-cron".to_string());
        assert_eq!(error.to_string(), "invalid cron expression: not-a-cron");
    }

    #[test]
    fn test_error_debug() {
        let error = QueueError::QueueNotFound("test".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("QueueNotFound"));
    }
}
