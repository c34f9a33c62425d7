//! Error types for thread launching and task admission

use core::fmt;
use std::io;

/// Result of a thread launch
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Result of submitting work to an executor
pub type SubmitResult = Result<(), RejectedError>;

/// OS-level thread creation failed.
///
/// Not retried by the launcher; the caller decides whether the process is
/// resource-starved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The OS refused to create the thread
    Spawn(io::ErrorKind),

    /// The launcher's cap on concurrently running threads was reached
    ThreadLimit(usize),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::Spawn(kind) => write!(f, "failed to spawn worker thread: {}", kind),
            LaunchError::ThreadLimit(max) => {
                write!(f, "worker thread limit reached ({} running)", max)
            }
        }
    }
}

impl std::error::Error for LaunchError {}

impl From<io::Error> for LaunchError {
    fn from(e: io::Error) -> Self {
        LaunchError::Spawn(e.kind())
    }
}

/// Submission refused by an executor.
///
/// An admission-control signal: the caller should shed load or retry later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectedError {
    /// `start()` has not been called yet
    NotStarted,

    /// Shutdown has begun; queued work is draining
    ShuttingDown,

    /// The executor has stopped
    ShutDown,

    /// Bounded queue is at capacity
    QueueFull(usize),

    /// A dedicated thread could not be launched for the work
    LaunchFailed(LaunchError),
}

impl RejectedError {
    /// True when the rejection is caused by shutdown rather than load
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RejectedError::ShuttingDown | RejectedError::ShutDown)
    }
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectedError::NotStarted => write!(f, "executor not started"),
            RejectedError::ShuttingDown => write!(f, "executor shutting down"),
            RejectedError::ShutDown => write!(f, "executor shut down"),
            RejectedError::QueueFull(cap) => write!(f, "task queue full ({} pending)", cap),
            RejectedError::LaunchFailed(e) => write!(f, "rejected: {}", e),
        }
    }
}

impl std::error::Error for RejectedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RejectedError::LaunchFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LaunchError> for RejectedError {
    fn from(e: LaunchError) -> Self {
        RejectedError::LaunchFailed(e)
    }
}
