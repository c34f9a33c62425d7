//! `FixedExecutor` - bounded worker pool.
//!
//! Spawns `pool_threads` OS threads at `start()`. Workers block on the
//! shared FIFO queue and run one task at a time. Readiness waits go to the
//! `ReadinessDispatcher`, so the thread count is
//! `pool_threads + 1 reactor + max_waiters` however many sessions wait.
//!
//! No dynamic scaling. `schedule` on a full bounded queue fails with
//! `RejectedError::QueueFull` instead of blocking.

use crate::config::ExecutorConfig;
use crate::launcher::{ThreadAccounting, ThreadLauncher, WorkerHandle};
use crate::lifecycle::{Lifecycle, StartOutcome};
use crate::locks::lock;
use crate::queue::{Next, TaskQueue};
use crate::readiness::{ReadinessDispatcher, TaskSink};
use crate::stats::ExecutorCounters;
use svcexec_core::error::{LaunchError, RejectedError};
use svcexec_core::executor::Executor;
use svcexec_core::session::{ReadyCallback, SessionHandle};
use svcexec_core::state::{ExecutorState, ExecutorStats, ShutdownReport};
use svcexec_core::task::Task;
use svcexec_core::{kerror, kinfo, ktrace, kwarn};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const NAME: &str = "fixed";

/// Shared state between the executor handle and workers.
struct PoolInner {
    lifecycle: Lifecycle,
    queue: TaskQueue,
    counters: Arc<ExecutorCounters>,
}

impl TaskSink for PoolInner {
    fn submit(&self, task: Task) -> Result<(), RejectedError> {
        self.queue.push(&self.lifecycle, task).map(|_| ())
    }
}

pub struct FixedExecutor {
    inner: Arc<PoolInner>,
    dispatcher: ReadinessDispatcher,
    launcher: ThreadLauncher,
    capacity: usize,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl FixedExecutor {
    /// Pool of `config.pool_threads` workers; nothing runs until `start()`.
    pub fn new(config: &ExecutorConfig, accounting: Arc<ThreadAccounting>) -> Self {
        let counters = Arc::new(ExecutorCounters::new());
        let inner = Arc::new(PoolInner {
            lifecycle: Lifecycle::new(NAME),
            queue: TaskQueue::new(config.queue_bound()),
            counters: Arc::clone(&counters),
        });
        let dispatcher = ReadinessDispatcher::new(
            NAME,
            config,
            &accounting,
            Arc::clone(&inner) as Arc<dyn TaskSink>,
            counters,
        );
        Self {
            inner,
            dispatcher,
            launcher: ThreadLauncher::new(config, "pool", accounting),
            capacity: config.pool_threads.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every worker is busy, or work is already waiting in the queue
    pub fn is_saturated(&self) -> bool {
        self.inner.queue.len() > 0 || self.inner.queue.idle() == 0
    }

    fn launch_workers(&self) -> Result<(), LaunchError> {
        let mut workers = lock(&self.workers);
        for _ in 0..self.capacity {
            let inner = Arc::clone(&self.inner);
            workers.push(self.launcher.launch(move || worker_loop(inner))?);
        }
        drop(workers);
        self.dispatcher.start()
    }

    /// Stop the queue, join workers, and publish the final report.
    fn stop(&self, started: Instant, deadline: Instant) -> ShutdownReport {
        let leftovers = self.inner.queue.drain(deadline);
        let cancelled = leftovers.len();
        for task in leftovers {
            self.inner.counters.cancel(NAME, task);
        }

        let dispatch = self.dispatcher.shutdown();

        let workers: Vec<WorkerHandle> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            worker.join();
        }

        let report = ShutdownReport {
            drained: cancelled == 0,
            cancelled,
            sessions_ended: dispatch.sessions_ended,
            elapsed: started.elapsed(),
        };
        self.inner.lifecycle.finish(report.clone());
        report
    }
}

impl Executor for FixedExecutor {
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
        if let Err(e) = self.launch_workers() {
            kerror!("{}: start failed, stopping: {}", NAME, e);
            let now = Instant::now();
            self.inner.queue.close(&self.inner.lifecycle);
            self.stop(now, now);
            return Err(e);
        }
        kinfo!("{}: started {} workers", NAME, self.capacity);
        Ok(())
    }

    fn schedule(&self, task: Task) -> Result<(), RejectedError> {
        let backlog = self.inner.queue.push(&self.inner.lifecycle, task)?;
        ktrace!("{}: queued ({} pending, {} idle)", NAME, backlog.queued, backlog.idle);
        Ok(())
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
        if !self.inner.queue.close(&self.inner.lifecycle) {
            return self.inner.lifecycle.wait_stopped();
        }
        self.stop(started, started + deadline)
    }

    fn stats(&self) -> ExecutorStats {
        let threads = lock(&self.workers).len() + self.dispatcher.threads();
        self.inner.counters.snapshot(threads, self.inner.queue.len())
    }
}

impl Drop for FixedExecutor {
    fn drop(&mut self) {
        // Workers exit once the queue is empty. Call shutdown() to join.
        self.inner.queue.close(&self.inner.lifecycle);
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        match inner.queue.next(&inner.lifecycle, None) {
            Next::Task(task) => inner.counters.run(NAME, task),
            Next::TimedOut => continue,
            Next::Exit => break,
        }
    }
}
