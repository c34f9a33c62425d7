//! Registry of sessions an executor's threads are blocked on.
//!
//! Shutdown ends every registered session once its deadline has passed so
//! the blocked threads return and can be joined. After `close()`, new waits
//! return `Closed` without blocking.

use crate::locks::lock;
use svcexec_core::readiness::wait_for_data;
use svcexec_core::session::{Readiness, SessionHandle, SessionId};
use svcexec_core::kdebug;

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct WaitState {
    sessions: HashMap<SessionId, SessionHandle>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct WaitSet {
    state: Mutex<WaitState>,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocking readiness wait on `session`, visible to `close()`
    pub(crate) fn wait(&self, session: &SessionHandle) -> Readiness {
        let id = session.id();
        {
            let mut s = lock(&self.state);
            if s.closed {
                return Readiness::Closed;
            }
            s.sessions.insert(id, SessionHandle::clone(session));
        }
        let readiness = wait_for_data(session.as_ref());
        lock(&self.state).sessions.remove(&id);
        readiness
    }

    /// Sessions currently blocked
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    /// End every blocked session and refuse further waits.
    ///
    /// Returns the number of sessions ended.
    pub(crate) fn close(&self) -> usize {
        let blocked: Vec<SessionHandle> = {
            let mut s = lock(&self.state);
            s.closed = true;
            s.sessions.values().cloned().collect()
        };
        for session in &blocked {
            kdebug!("ending {} blocked in readiness wait", session.id());
            session.end();
        }
        blocked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{wait_for, MockSession};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_close_ends_blocked_waits() {
        let set = Arc::new(WaitSet::new());
        let session: SessionHandle = MockSession::new();
        let (set2, s2) = (set.clone(), session.clone());
        let waiter = thread::spawn(move || set2.wait(&s2));

        assert!(wait_for(Duration::from_secs(2), || set.len() == 1));
        assert_eq!(set.close(), 1);
        assert_eq!(waiter.join().unwrap(), Readiness::Closed);
        assert!(!session.is_connected());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_wait_after_close_does_not_block() {
        let set = WaitSet::new();
        assert_eq!(set.close(), 0);
        let session: SessionHandle = MockSession::new();
        assert_eq!(set.wait(&session), Readiness::Closed);
        assert!(session.is_connected());
    }
}
