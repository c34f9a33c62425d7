//! Shutdown & admission controller
//!
//! One `Lifecycle` per executor. It owns the state machine
//! `NotStarted → Running → ShuttingDown → Stopped`, decides admission,
//! counts admitted work that runs on detached threads, and publishes the
//! shutdown report so that every `shutdown()` caller sees the same result.
//!
//! Pool executors take their queue lock before calling `check_admission()`
//! and `begin_shutdown()`, which makes "admitted" and "enqueued" one step
//! with respect to shutdown.
//!
//! Lock order: queue, then lifecycle.

use crate::locks::{lock, wait, wait_until};
use svcexec_core::error::RejectedError;
use svcexec_core::state::{ExecutorState, ShutdownReport};
use svcexec_core::{kdebug, kinfo};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Result of `Lifecycle::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Moved `NotStarted → Running`; caller must bring up workers
    Started,
    /// Already running; nothing to do
    AlreadyRunning,
    /// Shutdown has begun; the executor cannot be restarted
    Closed,
}

struct Inner {
    state: ExecutorState,
    in_flight: usize,
    report: Option<ShutdownReport>,
}

pub struct Lifecycle {
    name: &'static str,
    inner: Mutex<Inner>,
    changed: Condvar,
    /// Lock-free mirror of `inner.state` for hot-path reads
    state_hint: AtomicU8,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                state: ExecutorState::NotStarted,
                in_flight: 0,
                report: None,
            }),
            changed: Condvar::new(),
            state_hint: AtomicU8::new(ExecutorState::NotStarted.into()),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn state(&self) -> ExecutorState {
        ExecutorState::from(self.state_hint.load(Ordering::Acquire))
    }

    fn set_state(&self, inner: &mut Inner, next: ExecutorState) {
        kdebug!("{}: {} -> {}", self.name, inner.state, next);
        inner.state = next;
        self.state_hint.store(next.into(), Ordering::Release);
        self.changed.notify_all();
    }

    pub fn start(&self) -> StartOutcome {
        let mut inner = lock(&self.inner);
        match inner.state {
            ExecutorState::NotStarted => {
                self.set_state(&mut inner, ExecutorState::Running);
                StartOutcome::Started
            }
            ExecutorState::Running => StartOutcome::AlreadyRunning,
            ExecutorState::ShuttingDown | ExecutorState::Stopped => StartOutcome::Closed,
        }
    }

    /// Admission check without tracking
    #[inline]
    pub fn check_admission(&self) -> Result<(), RejectedError> {
        lock(&self.inner).state.admit()
    }

    /// Admit one unit of work and track it until the returned guard drops.
    ///
    /// Used by executors whose work runs on threads not joined through a
    /// queue; `wait_idle*` waits for every outstanding admission.
    pub fn admit(self: &Arc<Self>) -> Result<Admission, RejectedError> {
        let mut inner = lock(&self.inner);
        inner.state.admit()?;
        inner.in_flight += 1;
        Ok(Admission {
            lifecycle: Arc::clone(self),
        })
    }

    /// Outstanding admissions
    pub fn in_flight(&self) -> usize {
        lock(&self.inner).in_flight
    }

    /// Stop admitting work.
    ///
    /// Returns `true` for the caller that performed the transition; that
    /// caller owns the drain and must eventually call `finish()`. Everyone
    /// else should `wait_stopped()`.
    pub fn begin_shutdown(&self) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            ExecutorState::NotStarted | ExecutorState::Running => {
                kinfo!("{}: shutting down ({} in flight)", self.name, inner.in_flight);
                self.set_state(&mut inner, ExecutorState::ShuttingDown);
                true
            }
            ExecutorState::ShuttingDown | ExecutorState::Stopped => false,
        }
    }

    /// Wait for outstanding admissions to reach zero.
    ///
    /// Returns `false` if `deadline` passed first.
    pub fn wait_idle_until(&self, deadline: Instant) -> bool {
        let mut inner = lock(&self.inner);
        while inner.in_flight > 0 {
            let (g, before_deadline) = wait_until(&self.changed, inner, deadline);
            inner = g;
            if !before_deadline {
                return inner.in_flight == 0;
            }
        }
        true
    }

    /// Wait for outstanding admissions to reach zero, however long it takes
    pub fn wait_idle(&self) {
        let mut inner = lock(&self.inner);
        while inner.in_flight > 0 {
            inner = wait(&self.changed, inner);
        }
    }

    /// Publish the shutdown report and move to `Stopped`
    pub fn finish(&self, report: ShutdownReport) {
        let mut inner = lock(&self.inner);
        kinfo!("{}: stopped ({})", self.name, report);
        inner.report = Some(report);
        self.set_state(&mut inner, ExecutorState::Stopped);
    }

    /// Block until the executor is `Stopped` and return its report
    pub fn wait_stopped(&self) -> ShutdownReport {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(report) = &inner.report {
                return report.clone();
            }
            inner = wait(&self.changed, inner);
        }
    }
}

/// Tracks one admitted unit of work; releases it on drop
pub struct Admission {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let mut inner = lock(&self.lifecycle.inner);
        inner.in_flight -= 1;
        if inner.in_flight == 0 {
            self.lifecycle.changed.notify_all();
        }
    }
}
