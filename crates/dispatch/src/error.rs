//! Dispatcher and task source errors

use medfleet_core::TaskId;
use medfleet_mesh::MeshError;
use thiserror::Error;

/// Task source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure talking to the task source
    #[error("Task source request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The task source answered with an unexpected status
    #[error("Task source returned {status} for {operation}")]
    Status {
        /// HTTP status code
        status: u16,
        /// What was attempted
        operation: String,
    },

    /// A task with this id already exists
    #[error("Duplicate task ID: {0}")]
    Duplicate(TaskId),

    /// The store's base URL cannot carry a task path
    #[error("Invalid task source URL {url}: {reason}")]
    InvalidUrl {
        /// Configured base URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// No task with this id exists
    #[error("Task not found: {0}")]
    NotFound(TaskId),
}

/// Dispatcher errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Task source failure
    #[error("Task source error: {0}")]
    Source(#[from] SourceError),

    /// Message encoding or decoding failure
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;
