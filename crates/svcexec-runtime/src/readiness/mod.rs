//! Readiness dispatcher for pool executors
//!
//! Waits on many sessions without pinning a pool worker per session.
//! Sessions that expose a pollable descriptor are watched by one epoll
//! reactor thread (Linux). Everything else goes to a small, bounded set of
//! blocking waiter threads. Either way, the OS thread count is independent
//! of the number of sessions.
//!
//! Per-session ordering: registrations for one session queue up in a lane;
//! only the head is armed, and the next one is armed after the head's
//! callback has finished running on a pool worker.
//!
//! ```text
//!   register ──► lane ──► arm ──┬─► reactor (epoll, fd sessions)
//!                  ▲            └─► waiter threads (blocking wait)
//!                  │                        │
//!               release ◄── callback task ◄─┘ (submitted to the pool)
//! ```

mod waiter;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        mod notifier;

        use epoll::Reactor;
    }
}

use crate::config::ExecutorConfig;
use crate::launcher::{ThreadAccounting, ThreadLauncher};
use crate::locks::lock;
use crate::stats::ExecutorCounters;
use svcexec_core::error::{LaunchError, RejectedError};
use svcexec_core::readiness::CallbackSlot;
use svcexec_core::session::{ReadyCallback, SessionHandle, SessionId, SessionOutcome};
use svcexec_core::task::{Task, TaskStatus};
use svcexec_core::{kdebug, ktrace};

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use waiter::WaiterPool;

/// Where ready callbacks are submitted
pub(crate) trait TaskSink: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), RejectedError>;
}

/// One pending readiness wait
pub(crate) struct Registration {
    session: SessionHandle,
    slot: CallbackSlot,
}

impl Registration {
    #[inline]
    fn id(&self) -> SessionId {
        self.session.id()
    }

    fn reject(self, err: RejectedError) {
        self.slot.fire(SessionOutcome::Rejected(err));
    }
}

/// What `ReadinessDispatcher::shutdown` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    /// Registrations failed with `Rejected`
    pub rejected: usize,
    /// Sessions ended while a waiter thread was blocked on them
    pub sessions_ended: usize,
}

struct Lanes {
    /// Present while the session has an armed registration; holds the
    /// registrations queued behind it.
    pending: HashMap<SessionId, VecDeque<Registration>>,
    closed: bool,
}

struct DispatchShared {
    name: &'static str,
    lanes: Mutex<Lanes>,
    sink: Arc<dyn TaskSink>,
    counters: Arc<ExecutorCounters>,
    waiters: WaiterPool,
    #[cfg(target_os = "linux")]
    reactor: Option<Reactor>,
}

pub(crate) struct ReadinessDispatcher {
    shared: Arc<DispatchShared>,
}

impl ReadinessDispatcher {
    pub(crate) fn new(
        name: &'static str,
        config: &ExecutorConfig,
        accounting: &Arc<ThreadAccounting>,
        sink: Arc<dyn TaskSink>,
        counters: Arc<ExecutorCounters>,
    ) -> Self {
        let waiters = WaiterPool::new(
            ThreadLauncher::new(config, &format!("{}-wait", name), Arc::clone(accounting)),
            config.max_waiters,
            config.idle_timeout,
        );

        #[cfg(target_os = "linux")]
        let reactor = match Reactor::new(
            ThreadLauncher::new(config, &format!("{}-poll", name), Arc::clone(accounting)),
            config.reactor_events,
        ) {
            Ok(r) => Some(r),
            Err(e) => {
                svcexec_core::kwarn!("{}: epoll unavailable, using waiter threads only: {}", name, e);
                None
            }
        };

        Self {
            shared: Arc::new(DispatchShared {
                name,
                lanes: Mutex::new(Lanes {
                    pending: HashMap::new(),
                    closed: false,
                }),
                sink,
                counters,
                waiters,
                #[cfg(target_os = "linux")]
                reactor,
            }),
        }
    }

    /// Bring up the reactor thread, if there is a reactor.
    ///
    /// Waiter threads are launched lazily as blocking waits arrive.
    pub(crate) fn start(&self) -> Result<(), LaunchError> {
        #[cfg(target_os = "linux")]
        if let Some(reactor) = &self.shared.reactor {
            reactor.start(&self.shared)?;
        }
        Ok(())
    }

    /// Queue a readiness wait for `session`.
    ///
    /// Fails only once the dispatcher has been shut down; the callback is
    /// dropped unrun in that case.
    pub(crate) fn register(
        &self,
        session: SessionHandle,
        callback: ReadyCallback,
    ) -> Result<(), RejectedError> {
        let shared = &self.shared;
        let id = session.id();
        let reg = Registration {
            session,
            slot: CallbackSlot::new(callback),
        };
        {
            let mut lanes = lock(&shared.lanes);
            if lanes.closed {
                return Err(RejectedError::ShuttingDown);
            }
            if let Some(lane) = lanes.pending.get_mut(&id) {
                ktrace!("{}: {} queued behind armed wait", shared.name, id);
                lane.push_back(reg);
                return Ok(());
            }
            lanes.pending.insert(id, VecDeque::new());
        }
        if !shared.arm(reg) {
            shared.release(id);
        }
        Ok(())
    }

    /// Fail every pending registration with `Rejected`, end sessions that
    /// waiter threads are blocked on, and join the dispatcher's threads.
    pub(crate) fn shutdown(&self) -> DispatchReport {
        let shared = &self.shared;
        let queued: Vec<Registration> = {
            let mut lanes = lock(&shared.lanes);
            lanes.closed = true;
            lanes.pending.values_mut().flat_map(|lane| lane.drain(..)).collect()
        };
        let mut report = DispatchReport {
            rejected: queued.len(),
            sessions_ended: 0,
        };
        for reg in queued {
            reg.reject(RejectedError::ShuttingDown);
        }

        #[cfg(target_os = "linux")]
        if let Some(reactor) = &shared.reactor {
            report.rejected += reactor.shutdown();
        }

        let (pending, ended) = shared.waiters.close();
        report.sessions_ended = ended;
        report.rejected += pending.len();
        for reg in pending {
            shared.abort(reg, RejectedError::ShuttingDown);
        }
        shared.waiters.join();

        kdebug!(
            "{}: dispatcher stopped ({} rejected, {} sessions ended)",
            shared.name,
            report.rejected,
            report.sessions_ended
        );
        report
    }

    /// Threads currently owned by the dispatcher
    pub(crate) fn threads(&self) -> usize {
        let waiters = self.shared.waiters.threads();
        #[cfg(target_os = "linux")]
        if let Some(reactor) = &self.shared.reactor {
            if reactor.is_running() {
                return waiters + 1;
            }
        }
        waiters
    }

    /// Sessions with an armed or queued registration
    #[cfg(test)]
    pub(crate) fn sessions(&self) -> usize {
        lock(&self.shared.lanes).pending.len()
    }
}

impl DispatchShared {
    /// Hand `reg` to a backend.
    ///
    /// Returns `false` when the registration completed inline and the
    /// caller must `release` its session.
    fn arm(self: &Arc<Self>, reg: Registration) -> bool {
        if lock(&self.lanes).closed {
            reg.reject(RejectedError::ShuttingDown);
            return false;
        }
        if !reg.session.is_connected() {
            return self.deliver(reg, SessionOutcome::Closed);
        }

        self.counters.waiting_inc();

        #[cfg(target_os = "linux")]
        if let Some(reactor) = self.reactor.as_ref().filter(|r| r.is_running()) {
            if let Some(fd) = reg.session.readiness_fd() {
                reactor.watch(self, reg, fd);
                return true;
            }
        }

        self.wait_on_thread(reg);
        true
    }

    /// Route `reg` to a blocking waiter thread
    fn wait_on_thread(self: &Arc<Self>, reg: Registration) {
        if let Err((reg, err)) = self.waiters.submit(self, reg) {
            self.abort(reg, err);
        }
    }

    /// A backend observed readiness for `reg`
    fn complete(self: &Arc<Self>, reg: Registration, outcome: SessionOutcome) {
        self.counters.waiting_dec();
        let id = reg.id();
        if !self.deliver(reg, outcome) {
            self.release(id);
        }
    }

    /// A backend gave up on `reg`
    fn abort(self: &Arc<Self>, reg: Registration, err: RejectedError) {
        self.counters.waiting_dec();
        let id = reg.id();
        reg.reject(err);
        self.release(id);
    }

    /// Submit the callback to the pool.
    ///
    /// On rejection the callback fires inline with `Rejected` and this
    /// returns `false`.
    fn deliver(self: &Arc<Self>, reg: Registration, outcome: SessionOutcome) -> bool {
        let id = reg.id();
        let slot = reg.slot.clone();
        let callback = reg.slot.into_task(outcome);
        let shared = Arc::clone(self);
        let task = Task::new(move |status| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| match status {
                TaskStatus::Run => callback.run(),
                TaskStatus::Cancelled => callback.cancel(),
            }));
            shared.release(id);
            if let Err(payload) = result {
                panic::resume_unwind(payload);
            }
        });
        match self.sink.submit(task) {
            Ok(()) => true,
            Err(err) => {
                kdebug!("{}: {} callback rejected: {}", self.name, id, err);
                slot.fire(SessionOutcome::Rejected(err));
                false
            }
        }
    }

    /// The head registration for `id` is done; arm the next one.
    fn release(self: &Arc<Self>, id: SessionId) {
        loop {
            let next = {
                let mut lanes = lock(&self.lanes);
                let reg = match lanes.pending.get_mut(&id) {
                    Some(lane) => lane.pop_front(),
                    None => return,
                };
                match reg {
                    Some(reg) => reg,
                    None => {
                        lanes.pending.remove(&id);
                        return;
                    }
                }
            };
            if self.arm(next) {
                return;
            }
        }
    }
}
