//! Shared test fixtures

use svcexec_core::session::{Readiness, Session, SessionId};

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct MockState {
    readable: bool,
    /// Readability is never consumed
    sticky: bool,
    error: Option<io::ErrorKind>,
    ended: bool,
}

/// Session driven by the test: a wait blocks until `make_readable`,
/// `fail` or `end` is called. Readability is consumed by the wait.
pub(crate) struct MockSession {
    id: SessionId,
    state: Mutex<MockState>,
    changed: Condvar,
    waits: AtomicUsize,
    in_wait: AtomicUsize,
    max_in_wait: AtomicUsize,
}

impl MockSession {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::next(),
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
            waits: AtomicUsize::new(0),
            in_wait: AtomicUsize::new(0),
            max_in_wait: AtomicUsize::new(0),
        })
    }

    /// Session whose waits return `Readable` immediately, every time
    pub(crate) fn always_readable() -> Arc<Self> {
        let s = Self::new();
        {
            let mut st = s.state.lock().unwrap();
            st.readable = true;
            st.sticky = true;
        }
        s
    }

    pub(crate) fn make_readable(&self) {
        self.state.lock().unwrap().readable = true;
        self.changed.notify_all();
    }

    pub(crate) fn fail(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().error = Some(kind);
        self.changed.notify_all();
    }

    /// `wait_readable` calls started so far
    pub(crate) fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `wait_readable` calls
    pub(crate) fn max_concurrent_waits(&self) -> usize {
        self.max_in_wait.load(Ordering::SeqCst)
    }
}

impl Session for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn wait_readable(&self) -> Readiness {
        self.waits.fetch_add(1, Ordering::SeqCst);
        let now = self.in_wait.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_wait.fetch_max(now, Ordering::SeqCst);

        let mut s = self.state.lock().unwrap();
        let result = loop {
            if s.ended {
                break Readiness::Closed;
            }
            if let Some(kind) = s.error {
                break Readiness::Errored(kind);
            }
            if s.readable {
                if !s.sticky {
                    s.readable = false;
                }
                break Readiness::Readable;
            }
            s = self.changed.wait(s).unwrap();
        };
        drop(s);
        self.in_wait.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().unwrap().ended
    }

    fn end(&self) {
        self.state.lock().unwrap().ended = true;
        self.changed.notify_all();
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
