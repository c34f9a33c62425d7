//! Per-executor counters and the task execution wrapper.

use svcexec_core::state::ExecutorStats;
use svcexec_core::task::Task;
use svcexec_core::{kerror, ktrace};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ExecutorCounters {
    running: AtomicUsize,
    executed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
    waiting: AtomicUsize,
}

impl ExecutorCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the current thread.
    ///
    /// A panic inside the task is caught and logged so the worker thread
    /// survives; the task still counts as executed.
    pub(crate) fn run(&self, name: &str, task: Task) {
        self.running.fetch_add(1, Ordering::Relaxed);
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run()));
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = result {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            kerror!("{}: task panicked: {}", name, panic_message(payload.as_ref()));
        } else {
            ktrace!("{}: task done", name);
        }
    }

    /// Cancel `task`, containing any panic from its cancellation path
    pub(crate) fn cancel(&self, name: &str, task: Task) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.cancel())) {
            kerror!("{}: task panicked on cancel: {}", name, panic_message(payload.as_ref()));
        }
    }

    #[inline]
    pub(crate) fn waiting_inc(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn waiting_dec(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, threads: usize, queued: usize) -> ExecutorStats {
        ExecutorStats {
            threads,
            tasks_running: self.running.load(Ordering::Relaxed),
            tasks_queued: queued,
            tasks_executed: self.executed.load(Ordering::Relaxed),
            tasks_cancelled: self.cancelled.load(Ordering::Relaxed),
            tasks_panicked: self.panicked.load(Ordering::Relaxed),
            sessions_waiting: self.waiting.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_panic_containment() {
        let c = ExecutorCounters::new();
        c.run("test", Task::from_fn(|| {}));
        c.run("test", Task::from_fn(|| panic!("boom")));
        c.cancel("test", Task::from_fn(|| unreachable!()));
        c.waiting_inc();

        let stats = c.snapshot(2, 5);
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.tasks_queued, 5);
        assert_eq!(stats.tasks_executed, 2);
        assert_eq!(stats.tasks_panicked, 1);
        assert_eq!(stats.tasks_cancelled, 1);
        assert_eq!(stats.tasks_running, 0);
        assert_eq!(stats.sessions_waiting, 1);
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(p.as_ref()), "<non-string panic payload>");
    }
}
