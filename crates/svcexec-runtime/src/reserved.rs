//! `ReservedExecutor` - overflow pool for exempt work.
//!
//! Held back from ordinary admission: connections land here only when the
//! regular pool is saturated and the client is exempt from the limit.
//! Keeps `reserved_threads` workers (at least one) alive and idle, grows
//! through the launcher up to `reserved_max_threads` while work is
//! backing up, and lets surplus workers exit after `idle_timeout`.
//!
//! Readiness waits never occupy a pool worker. They go to the pool's own
//! `ReadinessDispatcher`, and only the ready callback is queued here, so
//! idle sessions cannot starve the tasks this pool exists to run.

use crate::config::ExecutorConfig;
use crate::launcher::{ThreadAccounting, ThreadLauncher, WorkerHandle};
use crate::lifecycle::{Lifecycle, StartOutcome};
use crate::locks::lock;
use crate::queue::{Backlog, Next, TaskQueue};
use crate::readiness::{ReadinessDispatcher, TaskSink};
use crate::stats::ExecutorCounters;
use svcexec_core::error::{LaunchError, RejectedError};
use svcexec_core::executor::Executor;
use svcexec_core::session::{ReadyCallback, SessionHandle};
use svcexec_core::state::{ExecutorState, ExecutorStats, ShutdownReport};
use svcexec_core::task::Task;
use svcexec_core::{kdebug, kerror, kinfo, ktrace, kwarn};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const NAME: &str = "reserved";

struct ReservedInner {
    lifecycle: Lifecycle,
    queue: TaskQueue,
    counters: Arc<ExecutorCounters>,
    launcher: ThreadLauncher,
    /// Workers kept alive when idle
    reserve: usize,
    /// Growth ceiling
    max: usize,
    idle_timeout: Duration,
    /// Live workers
    threads: AtomicUsize,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl ReservedInner {
    /// Launch one more worker unless the ceiling is reached or shutdown
    /// has begun.
    fn grow(self: &Arc<Self>) -> Result<bool, LaunchError> {
        // Shutdown drains `workers` under this lock after closing, so a
        // worker launched here is either joined or never launched.
        let mut workers = lock(&self.workers);
        if self.lifecycle.state().is_closing() {
            return Ok(false);
        }
        let claimed = self
            .threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            });
        if claimed.is_err() {
            return Ok(false);
        }

        let mut i = 0;
        while i < workers.len() {
            if workers[i].is_finished() {
                workers.swap_remove(i).join();
            } else {
                i += 1;
            }
        }

        let inner = Arc::clone(self);
        match self.launcher.launch(move || worker_loop(inner)) {
            Ok(handle) => {
                workers.push(handle);
                Ok(true)
            }
            Err(e) => {
                self.threads.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    /// Grow if the queue has more work than idle workers
    fn grow_for(self: &Arc<Self>, backlog: Backlog) {
        if backlog.queued > backlog.idle {
            match self.grow() {
                Ok(true) => ktrace!("{}: grew to {} workers", NAME, self.threads.load(Ordering::Relaxed)),
                Ok(false) => {}
                Err(e) => kwarn!("{}: growth failed: {}", NAME, e),
            }
        }
    }

    /// Queue `task` and grow for the backlog it leaves
    fn submit(self: &Arc<Self>, task: Task) -> Result<(), RejectedError> {
        let backlog = self.queue.push(&self.lifecycle, task)?;
        self.grow_for(backlog);
        Ok(())
    }

    /// An idle worker may exit only while above the reserve
    fn try_retire(&self) -> bool {
        self.threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > self.reserve).then(|| n - 1)
            })
            .is_ok()
    }
}

/// Ready callbacks enter the pool the same way `schedule` does
struct ReservedSink(Arc<ReservedInner>);

impl TaskSink for ReservedSink {
    fn submit(&self, task: Task) -> Result<(), RejectedError> {
        self.0.submit(task)
    }
}

pub struct ReservedExecutor {
    inner: Arc<ReservedInner>,
    dispatcher: ReadinessDispatcher,
}

impl ReservedExecutor {
    pub fn new(config: &ExecutorConfig, accounting: Arc<ThreadAccounting>) -> Self {
        let max = config.reserved_max_threads.max(1);
        let counters = Arc::new(ExecutorCounters::new());
        let inner = Arc::new(ReservedInner {
            lifecycle: Lifecycle::new(NAME),
            queue: TaskQueue::new(None),
            counters: Arc::clone(&counters),
            launcher: ThreadLauncher::new(config, "reserve", Arc::clone(&accounting)),
            reserve: config.reserved_threads.clamp(1, max),
            max,
            idle_timeout: config.idle_timeout,
            threads: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        });
        let dispatcher = ReadinessDispatcher::new(
            NAME,
            config,
            &accounting,
            Arc::new(ReservedSink(Arc::clone(&inner))),
            counters,
        );
        Self { inner, dispatcher }
    }

    /// Live worker threads
    pub fn threads(&self) -> usize {
        self.inner.threads.load(Ordering::Acquire)
    }
}

impl Executor for ReservedExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn state(&self) -> ExecutorState {
        self.inner.lifecycle.state()
    }

    fn start(&self) -> Result<(), LaunchError> {
        match self.inner.lifecycle.start() {
            StartOutcome::Started => {}
            StartOutcome::AlreadyRunning => return Ok(()),
            StartOutcome::Closed => {
                kwarn!("{}: start after shutdown ignored", NAME);
                return Ok(());
            }
        }
        let started = (0..self.inner.reserve)
            .try_for_each(|_| self.inner.grow().map(|_| ()))
            .and_then(|()| self.dispatcher.start());
        if let Err(e) = started {
            kerror!("{}: start failed, stopping: {}", NAME, e);
            self.shutdown(Duration::ZERO);
            return Err(e);
        }
        kinfo!(
            "{}: started {} workers (max {})",
            NAME,
            self.inner.reserve,
            self.inner.max
        );
        Ok(())
    }

    fn schedule(&self, task: Task) -> Result<(), RejectedError> {
        self.inner.submit(task)
    }

    fn run_when_data_available(
        &self,
        session: SessionHandle,
        callback: ReadyCallback,
    ) -> Result<(), RejectedError> {
        self.state().admit()?;
        self.dispatcher.register(session, callback)
    }

    fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        let started = Instant::now();
        let inner = &self.inner;
        if !inner.queue.close(&inner.lifecycle) {
            return inner.lifecycle.wait_stopped();
        }

        let leftovers = inner.queue.drain(started + deadline);
        let cancelled = leftovers.len();
        for task in leftovers {
            inner.counters.cancel(NAME, task);
        }
        let dispatch = self.dispatcher.shutdown();

        let workers: Vec<WorkerHandle> = lock(&inner.workers).drain(..).collect();
        let joined = workers.len();
        for worker in workers {
            worker.join();
        }
        kdebug!(
            "{}: {} workers joined, {} live",
            NAME,
            joined,
            inner.threads.load(Ordering::Acquire)
        );

        let report = ShutdownReport {
            drained: cancelled == 0,
            cancelled,
            sessions_ended: dispatch.sessions_ended,
            elapsed: started.elapsed(),
        };
        inner.lifecycle.finish(report.clone());
        report
    }

    fn stats(&self) -> ExecutorStats {
        self.inner
            .counters
            .snapshot(self.threads() + self.dispatcher.threads(), self.inner.queue.len())
    }
}

impl Drop for ReservedExecutor {
    fn drop(&mut self) {
        self.inner.queue.close(&self.inner.lifecycle);
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<ReservedInner>) {
    loop {
        match inner.queue.next(&inner.lifecycle, Some(inner.idle_timeout)) {
            Next::Task(task) => inner.counters.run(NAME, task),
            Next::TimedOut => {
                if inner.try_retire() {
                    ktrace!("{}: idle worker retired", NAME);
                    return;
                }
            }
            Next::Exit => {
                inner.threads.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        }
    }
}
