//! Default readiness dispatch.
//!
//! [`schedule_callback_on_data_available`] blocks the calling thread until
//! the session is readable, closed, or errored, then hands the callback to
//! the executor as a task. It is the portable fallback behind
//! `Executor::run_when_data_available`; pool executors replace it with a
//! multiplexed wait.

use crate::executor::Executor;
use crate::session::{ReadyCallback, Readiness, Session, SessionOutcome};
use crate::task::{Task, TaskStatus};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, fire-once holder for a readiness callback.
///
/// Lets both the submitted task and the rejection path reach the same
/// callback; whichever fires first wins, the other is a no-op.
#[derive(Clone)]
pub struct CallbackSlot {
    inner: Arc<Mutex<Option<ReadyCallback>>>,
}

impl CallbackSlot {
    pub fn new(callback: ReadyCallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(callback))),
        }
    }

    /// Invoke the callback if it has not fired yet.
    ///
    /// Returns `false` if it had already fired.
    pub fn fire(&self, outcome: SessionOutcome) -> bool {
        let callback = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(cb) => {
                cb(outcome);
                true
            }
            None => false,
        }
    }

    /// Task that fires the callback with `outcome`, or with `Cancelled`
    /// if the executor cancels it.
    pub fn into_task(self, outcome: SessionOutcome) -> Task {
        Task::new(move |status| {
            let outcome = match status {
                TaskStatus::Run => outcome,
                TaskStatus::Cancelled => SessionOutcome::Cancelled,
            };
            self.fire(outcome);
        })
    }
}

/// Block until `session` is readable, closed, or errored.
///
/// Returns `Closed` immediately for a session that is already disconnected.
pub fn wait_for_data(session: &dyn Session) -> Readiness {
    if !session.is_connected() {
        return Readiness::Closed;
    }
    session.wait_readable()
}

/// Wait for `session` on the calling thread, then submit `callback` to
/// `executor` with the outcome.
///
/// If the executor rejects the submission the callback runs synchronously
/// on this thread with `SessionOutcome::Rejected`.
pub fn schedule_callback_on_data_available<E>(
    session: &dyn Session,
    callback: ReadyCallback,
    executor: &E,
) where
    E: Executor + ?Sized,
{
    let outcome = SessionOutcome::from(wait_for_data(session));
    let slot = CallbackSlot::new(callback);
    if let Err(err) = executor.schedule(slot.clone().into_task(outcome)) {
        crate::kdebug!("{}: readiness callback rejected: {}", session.id(), err);
        slot.fire(SessionOutcome::Rejected(err));
    }
}
