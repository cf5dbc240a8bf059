//! Error types for the run loop.

use thiserror::Error;

/// Errors that can occur in the run loop.
#[derive(Debug, Error)]
pub enum RunLoopError {
    /// No run frame is active on the calling thread.
    #[error("run loop is not running")]
    NotRunning,

    /// The target loop has begun destruction; posted work was rejected.
    #[error("run loop has been terminated")]
    Terminated,

    /// An I/O handler token is already registered or reserved.
    #[error("I/O token {0} is already in use")]
    TokenInUse(u64),
}

/// Result type for run loop operations.
pub type RunLoopResult<T> = Result<T, RunLoopError>;
