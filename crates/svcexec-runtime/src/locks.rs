//! Poison-tolerant lock helpers.
//!
//! Tasks never run while one of our mutexes is held, so a poisoned lock
//! only means a panic in bookkeeping code; the protected data is still
//! consistent and we keep going.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub(crate) fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Wait with a timeout. Returns the guard and whether the wait timed out.
#[inline]
pub(crate) fn wait_timeout<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> (MutexGuard<'a, T>, bool) {
    match cv.wait_timeout(guard, timeout) {
        Ok((g, r)) => (g, r.timed_out()),
        Err(poisoned) => {
            let (g, r) = poisoned.into_inner();
            (g, r.timed_out())
        }
    }
}

/// Wait until `deadline`. Returns the guard and `false` once the deadline
/// has passed.
#[inline]
pub(crate) fn wait_until<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Instant,
) -> (MutexGuard<'a, T>, bool) {
    let now = Instant::now();
    if now >= deadline {
        return (guard, false);
    }
    let (g, _) = wait_timeout(cv, guard, deadline - now);
    (g, Instant::now() < deadline)
}
