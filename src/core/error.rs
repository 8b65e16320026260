//! Error types for pool operations.

use thiserror::Error;

/// Errors produced by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been told to shut down; the task was not admitted.
    #[error("pool is shutting down")]
    ShuttingDown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
