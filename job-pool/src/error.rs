//! Error types for the job-pool crate.

use std::io;

/// Errors that can occur in the thread pool and timer service.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pending-job limit was reached and the job was refused
    #[error("job queue is full")]
    TooManyJobs,

    /// No worker can be dedicated to a persistent job
    #[error("no worker available for a persistent job")]
    NoCapacity,

    /// The requested scheduling policy is not supported by the OS
    #[error("scheduling policy not supported on this platform")]
    InvalidPolicy,

    /// The pool attributes are inconsistent
    #[error("invalid pool attributes: {0}")]
    InvalidAttr(&'static str),

    /// The OS refused to create a worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// The timer service has been shut down
    #[error("timer service has been stopped")]
    Stopped,
}

/// Convenience type alias for Results using PoolError.
pub type Result<T> = std::result::Result<T, PoolError>;
