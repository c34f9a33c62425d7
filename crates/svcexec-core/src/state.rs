//! Executor lifecycle state and diagnostics types

use crate::error::RejectedError;
use core::fmt;
use std::time::Duration;

/// Lifecycle of an executor.
///
/// Transitions only move forward:
/// `NotStarted → Running → ShuttingDown → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExecutorState {
    /// Created, `start()` not called yet
    NotStarted = 0,

    /// Accepting and executing work
    Running = 1,

    /// New work rejected, queued work draining
    ShuttingDown = 2,

    /// All workers joined
    Stopped = 3,
}

impl ExecutorState {
    /// Check whether new work may be admitted in this state
    #[inline]
    pub const fn accepts_work(&self) -> bool {
        matches!(self, ExecutorState::Running)
    }

    /// Check whether shutdown has begun (or finished)
    #[inline]
    pub const fn is_closing(&self) -> bool {
        matches!(self, ExecutorState::ShuttingDown | ExecutorState::Stopped)
    }

    /// Admission decision for this state
    #[inline]
    pub fn admit(&self) -> Result<(), RejectedError> {
        match self {
            ExecutorState::Running => Ok(()),
            ExecutorState::NotStarted => Err(RejectedError::NotStarted),
            ExecutorState::ShuttingDown => Err(RejectedError::ShuttingDown),
            ExecutorState::Stopped => Err(RejectedError::ShutDown),
        }
    }
}

impl From<u8> for ExecutorState {
    fn from(v: u8) -> Self {
        match v {
            0 => ExecutorState::NotStarted,
            1 => ExecutorState::Running,
            2 => ExecutorState::ShuttingDown,
            _ => ExecutorState::Stopped,
        }
    }
}

impl From<ExecutorState> for u8 {
    fn from(state: ExecutorState) -> u8 {
        state as u8
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::NotStarted => write!(f, "not-started"),
            ExecutorState::Running => write!(f, "running"),
            ExecutorState::ShuttingDown => write!(f, "shutting-down"),
            ExecutorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of `Executor::shutdown`.
///
/// Every call to `shutdown` on the same executor returns an equal report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queue emptied before the deadline; nothing was cancelled
    pub drained: bool,
    /// Tasks cancelled after the deadline passed
    pub cancelled: usize,
    /// Sessions ended because they were still blocked in a readiness wait
    pub sessions_ended: usize,
    /// Wall-clock time from shutdown start to `Stopped`
    pub elapsed: Duration,
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "drained={} cancelled={} sessions_ended={} elapsed={:?}",
            self.drained, self.cancelled, self.sessions_ended, self.elapsed
        )
    }
}

/// Point-in-time counters for one executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Live worker threads owned by the executor
    pub threads: usize,
    /// Tasks currently executing
    pub tasks_running: usize,
    /// Tasks waiting in the queue (pool variants)
    pub tasks_queued: usize,
    /// Tasks that ran to completion (including ones that panicked)
    pub tasks_executed: u64,
    /// Tasks cancelled by shutdown
    pub tasks_cancelled: u64,
    /// Tasks that panicked while running
    pub tasks_panicked: u64,
    /// Readiness registrations not yet delivered
    pub sessions_waiting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(ExecutorState::NotStarted < ExecutorState::Running);
        assert!(ExecutorState::Running < ExecutorState::ShuttingDown);
        assert!(ExecutorState::ShuttingDown < ExecutorState::Stopped);
    }

    #[test]
    fn test_admission_by_state() {
        assert!(ExecutorState::Running.admit().is_ok());
        assert_eq!(ExecutorState::NotStarted.admit(), Err(RejectedError::NotStarted));
        assert_eq!(ExecutorState::ShuttingDown.admit(), Err(RejectedError::ShuttingDown));
        assert_eq!(ExecutorState::Stopped.admit(), Err(RejectedError::ShutDown));

        assert!(ExecutorState::ShuttingDown.is_closing());
        assert!(!ExecutorState::Running.is_closing());
    }

    #[test]
    fn test_u8_roundtrip() {
        for s in [
            ExecutorState::NotStarted,
            ExecutorState::Running,
            ExecutorState::ShuttingDown,
            ExecutorState::Stopped,
        ] {
            assert_eq!(ExecutorState::from(u8::from(s)), s);
        }
    }
}
