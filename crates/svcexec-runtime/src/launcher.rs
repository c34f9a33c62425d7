//! Worker thread launcher
//!
//! Every OS thread an executor owns is created here. The launcher names
//! the thread, sizes its stack, enforces the optional running-thread cap,
//! and keeps the shared `ThreadAccounting` current.
//!
//! Accounting is an explicit object: whoever builds the executors creates
//! one `Arc<ThreadAccounting>` and hands it to every launcher that should
//! share counters and the cap.

use crate::config::ExecutorConfig;
use svcexec_core::error::LaunchError;
use svcexec_core::{kdebug, kwarn};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Stack size used when `RLIMIT_STACK` is unlimited or unreasonably large
pub const FALLBACK_STACK_SIZE: usize = 1 << 20;

/// Soft stack limits at or above this are treated as "unlimited"
#[cfg(unix)]
const MAX_RLIMIT_STACK: u64 = 1 << 30;

#[cfg(unix)]
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Process-scoped thread counters
#[derive(Debug, Default)]
pub struct ThreadAccounting {
    launched: AtomicU64,
    failed: AtomicU64,
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// Copy of the counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountingSnapshot {
    pub launched: u64,
    pub failed: u64,
    pub running: usize,
    pub peak: usize,
}

impl ThreadAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads successfully created
    #[inline]
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    /// Launch attempts that failed (cap or OS refusal)
    #[inline]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Launched threads that have not returned yet
    #[inline]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Highest `running` value observed
    #[inline]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            launched: self.launched(),
            failed: self.failed(),
            running: self.running(),
            peak: self.peak(),
        }
    }

    /// Reserve a running slot, honoring `limit`
    fn reserve(&self, limit: Option<usize>) -> Result<(), LaunchError> {
        let reserved = self
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| match limit {
                Some(max) if r >= max => None,
                _ => Some(r + 1),
            });
        match reserved {
            Ok(prev) => {
                self.peak.fetch_max(prev + 1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(LaunchError::ThreadLimit(limit.unwrap_or(0)))
            }
        }
    }

    fn release(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Decrements `running` when the launched thread finishes, panic or not
struct RunningGuard(Arc<ThreadAccounting>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Handle to a launched thread. Dropping it detaches the thread.
#[derive(Debug)]
pub struct WorkerHandle {
    inner: JoinHandle<()>,
}

impl WorkerHandle {
    /// OS thread name
    pub fn name(&self) -> Option<&str> {
        self.inner.thread().name()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the thread to exit. Returns `false` if it panicked.
    pub fn join(self) -> bool {
        self.inner.join().is_ok()
    }
}

/// Creates named worker threads for one executor.
pub struct ThreadLauncher {
    prefix: String,
    stack_size: usize,
    limit: Option<usize>,
    accounting: Arc<ThreadAccounting>,
    next_id: AtomicUsize,
}

impl ThreadLauncher {
    /// Launcher whose threads are named `<config prefix>-<role>-<n>`
    pub fn new(config: &ExecutorConfig, role: &str, accounting: Arc<ThreadAccounting>) -> Self {
        let stack_size = if config.stack_size == 0 {
            default_stack_size()
        } else {
            config.stack_size
        };
        Self {
            prefix: format!("{}-{}", config.thread_name_prefix, role),
            stack_size,
            limit: config.thread_limit(),
            accounting,
            next_id: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn accounting(&self) -> &Arc<ThreadAccounting> {
        &self.accounting
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Spawn a thread that runs `task` to completion and exits.
    ///
    /// Fails with `LaunchError` if the running-thread cap is reached or the
    /// OS refuses to create the thread; no thread exists in that case and
    /// `task` is dropped unrun. Never retries.
    pub fn launch<F>(&self, task: F) -> Result<WorkerHandle, LaunchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.accounting.reserve(self.limit) {
            kwarn!("{}: launch refused: {}", self.prefix, e);
            return Err(e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = RunningGuard(Arc::clone(&self.accounting));
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.prefix, id))
            .stack_size(self.stack_size)
            .spawn(move || {
                let _guard = guard;
                task();
            });

        match spawned {
            Ok(inner) => {
                self.accounting.launched.fetch_add(1, Ordering::Relaxed);
                kdebug!("{}-{}: launched", self.prefix, id);
                Ok(WorkerHandle { inner })
            }
            Err(e) => {
                // The closure (and its guard) was dropped by `spawn`, which
                // already released the running slot.
                self.accounting.failed.fetch_add(1, Ordering::Relaxed);
                kwarn!("{}: thread creation failed: {}", self.prefix, e);
                Err(LaunchError::from(e))
            }
        }
    }
}

/// Stack size for launched threads when none is configured.
///
/// Uses the soft `RLIMIT_STACK` when it is finite and below 1 GiB,
/// otherwise 1 MiB.
#[cfg(unix)]
pub fn default_stack_size() -> usize {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_STACK, &mut limit) };
    if rc != 0 {
        kwarn!("getrlimit(RLIMIT_STACK) failed: {}", nix::errno::Errno::last());
        return FALLBACK_STACK_SIZE;
    }
    if limit.rlim_cur == libc::RLIM_INFINITY || limit.rlim_cur as u64 >= MAX_RLIMIT_STACK {
        return FALLBACK_STACK_SIZE;
    }
    (limit.rlim_cur as usize).max(MIN_STACK_SIZE)
}

#[cfg(not(unix))]
pub fn default_stack_size() -> usize {
    FALLBACK_STACK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    fn launcher(limit: usize) -> ThreadLauncher {
        let config = ExecutorConfig::new()
            .max_launched_threads(limit)
            .thread_name_prefix("svx-test");
        ThreadLauncher::new(&config, "launch", Arc::new(ThreadAccounting::new()))
    }

    #[test]
    fn test_launch_runs_task_on_named_thread() {
        let l = launcher(0);
        let (tx, rx) = mpsc::channel();
        let handle = l
            .launch(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            })
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(name.starts_with("svx-test-launch-"), "{}", name);
        assert!(handle.join());

        let snap = l.accounting().snapshot();
        assert_eq!(snap.launched, 1);
        assert_eq!(snap.running, 0);
        assert_eq!(snap.failed, 0);
    }

    #[test]
    fn test_forced_failure_creates_no_thread() {
        let l = launcher(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = l
            .launch(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let err = l
            .launch(move || r.store(true, Ordering::SeqCst))
            .unwrap_err();
        assert_eq!(err, LaunchError::ThreadLimit(1));

        let snap = l.accounting().snapshot();
        assert_eq!(snap.launched, 1);
        assert_eq!(snap.running, 1);
        assert_eq!(snap.failed, 1);

        release_tx.send(()).unwrap();
        assert!(first.join());
        thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(l.accounting().running(), 0);
    }

    #[test]
    fn test_detached_thread_releases_slot() {
        let l = launcher(1);
        let (tx, rx) = mpsc::channel();
        drop(l.launch(move || tx.send(()).unwrap()).unwrap());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Slot is released once the detached thread returns.
        let mut freed = false;
        for _ in 0..200 {
            if l.accounting().running() == 0 {
                freed = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(freed);
        assert!(l.launch(|| {}).unwrap().join());
    }

    #[test]
    fn test_panicking_task_still_released() {
        let l = launcher(0);
        let handle = l.launch(|| panic!("task failure")).unwrap();
        assert!(!handle.join());
        assert_eq!(l.accounting().running(), 0);
        assert_eq!(l.accounting().peak(), 1);
    }

    #[test]
    fn test_default_stack_size_sane() {
        let size = default_stack_size();
        assert!(size >= 64 * 1024);
        assert!(size < (1 << 30));
    }
}
