//! The scheduling-policy abstraction.
//!
//! An `Executor` decides which OS thread runs a task. Connection code only
//! ever talks to this trait; the concrete policy (dedicated thread per
//! session, fixed pool, reserved overflow pool) is chosen by whoever builds
//! the executor.
//!
//! # Implementors
//!
//! - `SynchronousExecutor`: one launched thread per task / per session wait.
//! - `FixedExecutor`: bounded worker set, FIFO queue, multiplexed readiness.
//! - `ReservedExecutor`: small always-idle reserve that grows on demand.

use crate::error::{LaunchError, RejectedError};
use crate::readiness::schedule_callback_on_data_available;
use crate::session::{ReadyCallback, SessionHandle};
use crate::state::{ExecutorState, ExecutorStats, ShutdownReport};
use crate::task::Task;
use std::time::Duration;

/// Runs tasks according to one scheduling policy.
///
/// **Contract:**
/// - `schedule()` and `run_when_data_available()` fail fast with
///   `RejectedError` before `start()` and once `shutdown()` has begun.
///   Neither blocks waiting for a free worker.
/// - An accepted task is run exactly once, or cancelled exactly once if
///   shutdown drain expires first.
/// - Callbacks registered for one session are delivered in the order the
///   registrations were made.
/// - `shutdown()` returns only after every worker thread has exited.
///   Repeated calls return the same report.
pub trait Executor: Send + Sync {
    /// Short policy name for logs and stats
    fn name(&self) -> &'static str;

    /// Current lifecycle state
    fn state(&self) -> ExecutorState;

    /// Start worker threads. No-op if already running.
    fn start(&self) -> Result<(), LaunchError>;

    /// Submit a task
    fn schedule(&self, task: Task) -> Result<(), RejectedError>;

    /// Run `callback` once `session` has data to read (or has closed/errored).
    ///
    /// The provided implementation blocks the calling thread in the
    /// session's readiness wait and then submits the callback through
    /// `schedule`. Executors with a cheaper mechanism override it.
    fn run_when_data_available(
        &self,
        session: SessionHandle,
        callback: ReadyCallback,
    ) -> Result<(), RejectedError> {
        self.state().admit()?;
        schedule_callback_on_data_available(session.as_ref(), callback, self);
        Ok(())
    }

    /// Stop admitting work, drain until `deadline` elapses, cancel the rest,
    /// join workers.
    fn shutdown(&self, deadline: Duration) -> ShutdownReport;

    /// Counter snapshot
    fn stats(&self) -> ExecutorStats;
}
