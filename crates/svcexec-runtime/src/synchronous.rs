//! Dedicated-thread executor
//!
//! Every task, and every readiness wait, gets a freshly launched thread
//! that exits when its work is done. There is no queue: admission either
//! launches a thread or fails with `RejectedError::LaunchFailed`.
//!
//! A readiness wait runs its callback on the same thread that waited.
//! Successive waits on one session pass through that session's turnstile,
//! so their callbacks run in registration order.

use crate::config::ExecutorConfig;
use crate::launcher::{ThreadAccounting, ThreadLauncher, WorkerHandle};
use crate::lifecycle::{Lifecycle, StartOutcome};
use crate::locks::lock;
use crate::stats::ExecutorCounters;
use crate::turnstile::SessionTurnstiles;
use crate::waitset::WaitSet;
use svcexec_core::error::{LaunchError, RejectedError};
use svcexec_core::executor::Executor;
use svcexec_core::session::{ReadyCallback, SessionHandle, SessionOutcome};
use svcexec_core::state::{ExecutorState, ExecutorStats, ShutdownReport};
use svcexec_core::task::Task;
use svcexec_core::{kdebug, kwarn};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const NAME: &str = "synchronous";

pub struct SynchronousExecutor {
    lifecycle: Arc<Lifecycle>,
    launcher: ThreadLauncher,
    counters: Arc<ExecutorCounters>,
    turnstiles: Arc<SessionTurnstiles>,
    waits: Arc<WaitSet>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl SynchronousExecutor {
    pub fn new(config: &ExecutorConfig, accounting: Arc<ThreadAccounting>) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(NAME)),
            launcher: ThreadLauncher::new(config, "sync", accounting),
            counters: Arc::new(ExecutorCounters::new()),
            turnstiles: Arc::new(SessionTurnstiles::new()),
            waits: Arc::new(WaitSet::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Keep `handle` for joining at shutdown; reap threads already done.
    fn track(&self, handle: WorkerHandle) {
        let mut workers = lock(&self.workers);
        let mut i = 0;
        while i < workers.len() {
            if workers[i].is_finished() {
                workers.swap_remove(i).join();
            } else {
                i += 1;
            }
        }
        workers.push(handle);
    }

    /// Launched threads that have not been joined yet
    fn live_threads(&self) -> usize {
        lock(&self.workers).iter().filter(|w| !w.is_finished()).count()
    }
}

impl Executor for SynchronousExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn state(&self) -> ExecutorState {
        self.lifecycle.state()
    }

    fn start(&self) -> Result<(), LaunchError> {
        match self.lifecycle.start() {
            StartOutcome::Started => kdebug!("{}: running", NAME),
            StartOutcome::AlreadyRunning => {}
            StartOutcome::Closed => kwarn!("{}: start after shutdown ignored", NAME),
        }
        Ok(())
    }

    fn schedule(&self, task: Task) -> Result<(), RejectedError> {
        let admission = self.lifecycle.admit()?;
        let counters = Arc::clone(&self.counters);
        let handle = self.launcher.launch(move || {
            let _admission = admission;
            counters.run(NAME, task);
        })?;
        self.track(handle);
        Ok(())
    }

    fn run_when_data_available(
        &self,
        session: SessionHandle,
        callback: ReadyCallback,
    ) -> Result<(), RejectedError> {
        let admission = self.lifecycle.admit()?;
        let turn = self.turnstiles.enter(session.id());
        let lifecycle = Arc::clone(&self.lifecycle);
        let counters = Arc::clone(&self.counters);
        let waits = Arc::clone(&self.waits);

        let handle = self.launcher.launch(move || {
            let _admission = admission;
            turn.wait();

            counters.waiting_inc();
            let readiness = waits.wait(&session);
            counters.waiting_dec();

            let outcome = if lifecycle.state() == ExecutorState::Running {
                SessionOutcome::from(readiness)
            } else {
                SessionOutcome::Rejected(RejectedError::ShuttingDown)
            };
            counters.run(NAME, Task::from_fn(move || callback(outcome)));
            drop(turn);
        })?;
        self.track(handle);
        Ok(())
    }

    fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let started = Instant::now();
        if !self.lifecycle.begin_shutdown() {
            return self.lifecycle.wait_stopped();
        }

        let drained = self.lifecycle.wait_idle_until(started + deadline);
        let sessions_ended = self.waits.close();
        self.lifecycle.wait_idle();

        let workers: Vec<WorkerHandle> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            worker.join();
        }

        let report = ShutdownReport {
            drained,
            cancelled: 0,
            sessions_ended,
            elapsed: started.elapsed(),
        };
        self.lifecycle.finish(report.clone());
        report
    }

    fn stats(&self) -> ExecutorStats {
        self.counters.snapshot(self.live_threads(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{wait_for, MockSession};
    use svcexec_core::session::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    fn executor() -> SynchronousExecutor {
        let config = ExecutorConfig::new().thread_name_prefix("svx-test");
        let exec = SynchronousExecutor::new(&config, Arc::new(ThreadAccounting::new()));
        exec.start().unwrap();
        exec
    }

    #[test]
    fn test_rejects_before_start() {
        let exec = SynchronousExecutor::new(&ExecutorConfig::new(), Arc::new(ThreadAccounting::new()));
        assert_eq!(exec.state(), ExecutorState::NotStarted);
        assert_eq!(
            exec.schedule(Task::from_fn(|| {})).unwrap_err(),
            RejectedError::NotStarted
        );
    }

    #[test]
    fn test_each_task_gets_its_own_thread() {
        let exec = executor();
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            exec.schedule(Task::from_fn(move || {
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();
        }
        let mut ids: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        ids.sort_by_key(|id| format!("{:?}", id));
        ids.dedup();
        assert_eq!(ids.len(), 3);

        let report = exec.shutdown(Duration::from_secs(2));
        assert!(report.drained);
        assert_eq!(exec.stats().tasks_executed, 3);
    }

    #[test]
    fn test_launch_failure_surfaces() {
        let config = ExecutorConfig::new().max_launched_threads(1);
        let exec = SynchronousExecutor::new(&config, Arc::new(ThreadAccounting::new()));
        exec.start().unwrap();

        let (release_tx, release_rx) = mpsc::channel::<()>();
        exec.schedule(Task::from_fn(move || {
            let _ = release_rx.recv();
        }))
        .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let err = exec
            .schedule(Task::from_fn(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();
        assert_eq!(err, RejectedError::LaunchFailed(LaunchError::ThreadLimit(1)));

        release_tx.send(()).unwrap();
        exec.shutdown(Duration::from_secs(2));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_runs_on_waiting_thread() {
        let exec = executor();
        let session = MockSession::always_readable();
        let (tx, rx) = mpsc::channel();
        exec.run_when_data_available(
            session.clone(),
            Box::new(move |o| {
                let name = thread::current().name().map(str::to_string);
                tx.send((o, name)).unwrap();
            }),
        )
        .unwrap();
        let (outcome, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, SessionOutcome::Readable);
        assert!(name.unwrap().starts_with("svx-test-sync-"));
        assert_eq!(session.waits(), 1);
        exec.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_closed_session_fires_closed() {
        let exec = executor();
        let session = MockSession::new();
        session.end();
        let (tx, rx) = mpsc::channel();
        exec.run_when_data_available(session.clone(), Box::new(move |o| tx.send(o).unwrap()))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            SessionOutcome::Closed
        );
        assert_eq!(session.waits(), 0);
        exec.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_session_order_preserved() {
        let exec = executor();
        let session = MockSession::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        for i in 0..2 {
            let order = order.clone();
            let tx = tx.clone();
            exec.run_when_data_available(
                session.clone(),
                Box::new(move |_| {
                    order.lock().unwrap().push(i);
                    tx.send(()).unwrap();
                }),
            )
            .unwrap();
        }
        for _ in 0..2 {
            session.make_readable();
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
        assert_eq!(session.max_concurrent_waits(), 1);
        exec.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_ends_blocked_sessions() {
        let exec = executor();
        let session = MockSession::new();
        let (tx, rx) = mpsc::channel();
        exec.run_when_data_available(session.clone(), Box::new(move |o| tx.send(o).unwrap()))
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || session.waits() == 1));

        let report = exec.shutdown(Duration::from_millis(20));
        assert!(!report.drained);
        assert_eq!(report.sessions_ended, 1);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            SessionOutcome::Rejected(RejectedError::ShuttingDown)
        );
        assert_eq!(exec.stats().threads, 0);
        assert_eq!(exec.state(), ExecutorState::Stopped);
    }

    #[test]
    fn test_submissions_rejected_after_shutdown() {
        let exec = executor();
        let first = exec.shutdown(Duration::ZERO);
        assert_eq!(exec.shutdown(Duration::ZERO), first);
        assert_eq!(
            exec.schedule(Task::from_fn(|| {})).unwrap_err(),
            RejectedError::ShutDown
        );
        assert_eq!(
            exec.run_when_data_available(MockSession::new(), Box::new(|_| {}))
                .unwrap_err(),
            RejectedError::ShutDown
        );
        exec.start().unwrap();
        assert_eq!(exec.state(), ExecutorState::Stopped);
    }
}
