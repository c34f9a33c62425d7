//! Session boundary consumed from the connection layer
//!
//! A session is owned by the surrounding server. The executor only
//! borrows it to wait for readiness and to query liveness.

use crate::error::RejectedError;
use core::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to a session
pub type SessionHandle = Arc<dyn Session>;

/// Continuation for a readiness wait; fired exactly once
pub type ReadyCallback = Box<dyn FnOnce(SessionOutcome) + Send + 'static>;

/// Stable identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Wrap an id assigned by the connection layer
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a fresh process-unique id
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Result of a blocking readiness wait on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Bytes can be read without blocking
    Readable,
    /// Peer closed, or the session was ended locally
    Closed,
    /// The underlying connection reported an error
    Errored(io::ErrorKind),
}

/// What a readiness callback is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Readable,
    Closed,
    Errored(io::ErrorKind),
    /// The executor refused to run the callback
    Rejected(RejectedError),
    /// The callback task was cancelled by shutdown drain
    Cancelled,
}

impl SessionOutcome {
    /// True only when data is ready to read
    #[inline]
    pub fn is_readable(&self) -> bool {
        matches!(self, SessionOutcome::Readable)
    }
}

impl From<Readiness> for SessionOutcome {
    fn from(r: Readiness) -> Self {
        match r {
            Readiness::Readable => SessionOutcome::Readable,
            Readiness::Closed => SessionOutcome::Closed,
            Readiness::Errored(kind) => SessionOutcome::Errored(kind),
        }
    }
}

/// A network connection as seen by the executor.
///
/// **Contract:**
/// - `wait_readable()` blocks until data is readable, the peer closes,
///   or an error occurs. After `end()` it must return `Closed` promptly,
///   including for a wait already in progress.
/// - The executor never issues two concurrent waits on one session.
/// - `readiness_fd()` returning `Some` lets pool executors multiplex the
///   wait on an event loop instead of a blocked thread. The descriptor
///   must stay open while the session is alive.
pub trait Session: Send + Sync {
    /// Identifier used for per-session ordering
    fn id(&self) -> SessionId;

    /// Block until readable, closed, or errored
    fn wait_readable(&self) -> Readiness;

    /// Liveness query
    fn is_connected(&self) -> bool;

    /// Close the session, waking any in-progress wait
    fn end(&self);

    /// Descriptor that can be registered with the OS readiness mechanism
    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }
}
