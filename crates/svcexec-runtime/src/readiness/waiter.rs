//! Blocking waiter threads
//!
//! Sessions without a pollable descriptor are waited on here, one blocking
//! `wait_readable()` per thread. At most `max` threads exist at a time;
//! extra registrations queue until a waiter frees up. Idle waiters exit
//! after `idle_timeout`.

use super::{DispatchShared, Registration};
use crate::launcher::{ThreadLauncher, WorkerHandle};
use crate::locks::{lock, wait_timeout};
use svcexec_core::error::RejectedError;
use svcexec_core::readiness::wait_for_data;
use svcexec_core::session::{SessionHandle, SessionId, SessionOutcome};
use svcexec_core::{kdebug, ktrace, kwarn};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct WaiterState {
    queue: VecDeque<Registration>,
    /// Sessions a waiter thread is currently blocked on
    waiting: HashMap<SessionId, SessionHandle>,
    threads: usize,
    idle: usize,
    closed: bool,
}

pub(super) struct WaiterPool {
    launcher: ThreadLauncher,
    max: usize,
    idle_timeout: Duration,
    state: Mutex<WaiterState>,
    available: Condvar,
    handles: Mutex<Vec<WorkerHandle>>,
}

impl WaiterPool {
    pub(super) fn new(launcher: ThreadLauncher, max: usize, idle_timeout: Duration) -> Self {
        Self {
            launcher,
            max: max.max(1),
            idle_timeout,
            state: Mutex::new(WaiterState {
                queue: VecDeque::new(),
                waiting: HashMap::new(),
                threads: 0,
                idle: 0,
                closed: false,
            }),
            available: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Queue `reg` for a waiter, launching one if none is idle and the
    /// cap allows.
    ///
    /// Hands the registration back when the pool is closed, or when no
    /// waiter exists and none could be launched.
    pub(super) fn submit(
        &self,
        shared: &Arc<DispatchShared>,
        reg: Registration,
    ) -> Result<(), (Registration, RejectedError)> {
        let mut s = lock(&self.state);
        if s.closed {
            return Err((reg, RejectedError::ShuttingDown));
        }
        s.queue.push_back(reg);
        if s.idle >= s.queue.len() || s.threads >= self.max {
            drop(s);
            self.available.notify_one();
            return Ok(());
        }

        s.threads += 1;
        let worker = Arc::clone(shared);
        match self.launcher.launch(move || waiter_loop(worker)) {
            Ok(handle) => {
                drop(s);
                self.track(handle);
                Ok(())
            }
            Err(e) => {
                s.threads -= 1;
                if s.threads == 0 {
                    if let Some(reg) = s.queue.pop_back() {
                        return Err((reg, RejectedError::LaunchFailed(e)));
                    }
                }
                kwarn!("waiter launch failed, {} waiters remain: {}", s.threads, e);
                Ok(())
            }
        }
    }

    /// Keep `handle` for joining; reap waiters that already exited.
    fn track(&self, handle: WorkerHandle) {
        let mut handles = lock(&self.handles);
        let mut i = 0;
        while i < handles.len() {
            if handles[i].is_finished() {
                handles.swap_remove(i).join();
            } else {
                i += 1;
            }
        }
        handles.push(handle);
    }

    /// Stop accepting registrations and end every session a waiter is
    /// blocked on.
    ///
    /// Returns the registrations that never reached a waiter and the
    /// number of sessions ended.
    pub(super) fn close(&self) -> (Vec<Registration>, usize) {
        let (pending, blocked) = {
            let mut s = lock(&self.state);
            s.closed = true;
            let pending: Vec<Registration> = s.queue.drain(..).collect();
            let blocked: Vec<SessionHandle> = s.waiting.values().cloned().collect();
            (pending, blocked)
        };
        self.available.notify_all();
        for session in &blocked {
            kdebug!("ending {} blocked in readiness wait", session.id());
            session.end();
        }
        (pending, blocked.len())
    }

    /// Join every waiter thread
    pub(super) fn join(&self) {
        let handles: Vec<WorkerHandle> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            handle.join();
        }
    }

    pub(super) fn threads(&self) -> usize {
        lock(&self.state).threads
    }
}

fn waiter_loop(shared: Arc<DispatchShared>) {
    let pool = &shared.waiters;
    loop {
        let reg = {
            let mut s = lock(&pool.state);
            loop {
                if let Some(reg) = s.queue.pop_front() {
                    s.waiting.insert(reg.id(), Arc::clone(&reg.session));
                    break reg;
                }
                if s.closed {
                    s.threads -= 1;
                    return;
                }
                s.idle += 1;
                let (g, timed_out) = wait_timeout(&pool.available, s, pool.idle_timeout);
                s = g;
                s.idle -= 1;
                if timed_out && s.queue.is_empty() && !s.closed {
                    s.threads -= 1;
                    ktrace!("waiter idle, exiting ({} left)", s.threads);
                    return;
                }
            }
        };

        let outcome = SessionOutcome::from(wait_for_data(reg.session.as_ref()));
        lock(&pool.state).waiting.remove(&reg.id());
        shared.complete(reg, outcome);
    }
}
