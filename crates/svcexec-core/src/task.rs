//! Single-shot units of work

use core::fmt;

/// How a task is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Normal execution on a worker
    Run,
    /// Shutdown drain expired before the task was picked up
    Cancelled,
}

/// A deferred unit of work.
///
/// `run` and `cancel` consume the task, so it is invoked at most once.
/// Tasks built with [`Task::from_fn`] are dropped without running when
/// cancelled; tasks built with [`Task::new`] observe the cancellation.
pub struct Task {
    f: Box<dyn FnOnce(TaskStatus) + Send + 'static>,
}

impl Task {
    /// Task that is told whether it runs or is cancelled
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(TaskStatus) + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Task that only cares about running
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move |status| {
            if status == TaskStatus::Run {
                f();
            }
        })
    }

    /// Execute the task
    #[inline]
    pub fn run(self) {
        (self.f)(TaskStatus::Run)
    }

    /// Cancel the task
    #[inline]
    pub fn cancel(self) {
        (self.f)(TaskStatus::Cancelled)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
