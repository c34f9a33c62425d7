//! Pending-task queue shared by the pool executors.
//!
//! A `VecDeque` under a mutex with two condvars: `available` wakes idle
//! workers, `drained` wakes a shutdown waiting for the queue to empty.
//! Workers block on the condvar instead of spinning.

use crate::lifecycle::Lifecycle;
use crate::locks::{lock, wait, wait_timeout, wait_until};
use svcexec_core::error::RejectedError;
use svcexec_core::task::Task;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Queue depth and idle workers right after a push
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backlog {
    pub queued: usize,
    pub idle: usize,
}

/// What a worker should do next
pub(crate) enum Next {
    Task(Task),
    /// Idle timeout elapsed with nothing to do
    TimedOut,
    /// Queue closed and empty
    Exit,
}

struct QueueState {
    tasks: VecDeque<Task>,
    idle: usize,
    stop: bool,
}

pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    drained: Condvar,
    capacity: Option<usize>,
}

impl TaskQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                idle: 0,
                stop: false,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
            capacity,
        }
    }

    /// Admit and enqueue. Never blocks on capacity.
    pub(crate) fn push(&self, lifecycle: &Lifecycle, task: Task) -> Result<Backlog, RejectedError> {
        let mut s = lock(&self.state);
        // `close()` flips the state while holding this lock, so the check
        // and the push are atomic with respect to shutdown.
        lifecycle.check_admission()?;
        if let Some(cap) = self.capacity {
            if s.tasks.len() >= cap {
                return Err(RejectedError::QueueFull(cap));
            }
        }
        s.tasks.push_back(task);
        let backlog = Backlog {
            queued: s.tasks.len(),
            idle: s.idle,
        };
        drop(s);
        self.available.notify_one();
        Ok(backlog)
    }

    /// Block until a task is available, the queue is closed and empty, or
    /// `idle_timeout` elapses.
    pub(crate) fn next(&self, lifecycle: &Lifecycle, idle_timeout: Option<Duration>) -> Next {
        let mut s = lock(&self.state);
        loop {
            if let Some(task) = s.tasks.pop_front() {
                if s.tasks.is_empty() {
                    self.drained.notify_all();
                }
                return Next::Task(task);
            }
            if s.stop || lifecycle.state().is_closing() {
                return Next::Exit;
            }

            s.idle += 1;
            let timed_out = match idle_timeout {
                None => {
                    s = wait(&self.available, s);
                    false
                }
                Some(d) => {
                    let (g, timed_out) = wait_timeout(&self.available, s, d);
                    s = g;
                    timed_out
                }
            };
            s.idle -= 1;

            if timed_out && s.tasks.is_empty() && !s.stop && !lifecycle.state().is_closing() {
                return Next::TimedOut;
            }
        }
    }

    /// Begin shutdown under the queue lock and wake every idle worker.
    ///
    /// Returns `true` for the caller that performed the transition.
    pub(crate) fn close(&self, lifecycle: &Lifecycle) -> bool {
        let first = {
            let _s = lock(&self.state);
            lifecycle.begin_shutdown()
        };
        self.available.notify_all();
        first
    }

    /// Let workers drain the queue until `deadline`, then stop the queue and
    /// return whatever is left for the caller to cancel.
    pub(crate) fn drain(&self, deadline: Instant) -> Vec<Task> {
        let mut s = lock(&self.state);
        while !s.tasks.is_empty() {
            let (g, before_deadline) = wait_until(&self.drained, s, deadline);
            s = g;
            if !before_deadline {
                break;
            }
        }
        s.stop = true;
        let rest: Vec<Task> = s.tasks.drain(..).collect();
        drop(s);
        self.available.notify_all();
        rest
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.state).tasks.len()
    }

    pub(crate) fn idle(&self) -> usize {
        lock(&self.state).idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn running() -> Lifecycle {
        let lc = Lifecycle::new("queue-test");
        lc.start();
        lc
    }

    #[test]
    fn test_fifo_order() {
        let lc = running();
        let q = TaskQueue::new(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            q.push(&lc, Task::from_fn(move || seen.lock().unwrap().push(i)))
                .unwrap();
        }
        for _ in 0..3 {
            match q.next(&lc, None) {
                Next::Task(t) => t.run(),
                _ => panic!("expected a task"),
            }
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_bounded_rejects_immediately() {
        let lc = running();
        let q = TaskQueue::new(Some(2));
        q.push(&lc, Task::from_fn(|| {})).unwrap();
        q.push(&lc, Task::from_fn(|| {})).unwrap();
        let err = q.push(&lc, Task::from_fn(|| {})).unwrap_err();
        assert_eq!(err, RejectedError::QueueFull(2));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_not_started_rejects() {
        let lc = Lifecycle::new("queue-test");
        let q = TaskQueue::new(None);
        assert_eq!(
            q.push(&lc, Task::from_fn(|| {})).unwrap_err(),
            RejectedError::NotStarted
        );
    }

    #[test]
    fn test_idle_timeout() {
        let lc = running();
        let q = TaskQueue::new(None);
        assert!(matches!(
            q.next(&lc, Some(Duration::from_millis(10))),
            Next::TimedOut
        ));
    }

    #[test]
    fn test_close_wakes_idle_worker() {
        let lc = Arc::new(running());
        let q = Arc::new(TaskQueue::new(None));
        let (lc2, q2) = (lc.clone(), q.clone());
        let worker = thread::spawn(move || matches!(q2.next(&lc2, None), Next::Exit));
        while q.idle() == 0 {
            thread::yield_now();
        }
        assert!(q.close(&lc));
        assert!(!q.close(&lc));
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_drain_returns_leftovers_at_deadline() {
        let lc = running();
        let q = TaskQueue::new(None);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            q.push(&lc, Task::from_fn(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        q.close(&lc);
        let rest = q.drain(Instant::now());
        assert_eq!(rest.len(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(matches!(q.next(&lc, None), Next::Exit));
    }
}
