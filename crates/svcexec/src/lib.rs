//! # svcexec - Service Executor
//!
//! Decides which OS thread runs the work that arises from network
//! connections. Connection code sees one contract, [`Executor`]: "run this
//! unit of work, optionally once the connection has data to read". The
//! server picks the policy per deployment or per connection class.
//!
//! ## Policies
//!
//! - **Dedicated** ([`SynchronousExecutor`]): a fresh thread per task and
//!   per readiness wait. Lowest latency, one thread per active session.
//! - **Borrowed** ([`FixedExecutor`]): bounded worker pool; readiness waits
//!   are multiplexed (epoll reactor + a few waiter threads), so thread
//!   count does not grow with sessions.
//! - **Reserved** ([`ReservedExecutor`]): small overflow pool for exempt
//!   clients when the borrowed pool is saturated.
//!
//! ## Quick Start
//!
//! ```ignore
//! use svcexec::{ExecutorSet, ThreadingModel, Task};
//! use std::time::Duration;
//!
//! let set = ExecutorSet::from_env()?;
//! set.start()?;
//!
//! let exec = set.executor_for(ThreadingModel::Borrowed);
//! exec.schedule(Task::from_fn(|| println!("hello from a pool worker")))?;
//!
//! let reports = set.shutdown(Duration::from_secs(5));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connection handling code                   │
//! │          schedule(), run_when_data_available()              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  ExecutorSet::executor_for()
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │ Dedicated │      │   Fixed   │      │ Reserved  │
//!    │  thread   │      │   pool    │      │ overflow  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │       ThreadLauncher + ThreadAccounting + Lifecycle     │
//!    └─────────────────────────────────────────────────────────┘
//! ```

pub use svcexec_core::{
    env_get, env_get_bool, env_get_ms, env_get_opt, kprint, schedule_callback_on_data_available,
    wait_for_data, CallbackSlot, Executor, ExecutorState, ExecutorStats, LaunchError,
    LaunchResult, ReadyCallback, Readiness, RejectedError, Session, SessionHandle, SessionId,
    SessionOutcome, ShutdownReport, SubmitResult, Task, TaskStatus,
};
pub use svcexec_core::{kdebug, kerror, kinfo, kprintln, ktrace, kwarn};

pub use svcexec_runtime::{
    AccountingSnapshot, ConfigError, ExecutorConfig, FixedExecutor, ReservedExecutor,
    SynchronousExecutor, ThreadAccounting, ThreadLauncher, WorkerHandle,
};

#[cfg(unix)]
pub use svcexec_runtime::TcpSession;

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a connection class is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadingModel {
    /// One dedicated thread per active session
    Dedicated,
    /// Sessions borrow threads from the fixed pool
    Borrowed,
}

impl ThreadingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadingModel::Dedicated => "dedicated",
            ThreadingModel::Borrowed => "borrowed",
        }
    }
}

impl fmt::Display for ThreadingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadingModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedicated" | "one-thread-per-connection" | "sync" => Ok(ThreadingModel::Dedicated),
            "borrowed" | "pool-of-threads" | "pool" => Ok(ThreadingModel::Borrowed),
            _ => Err(ConfigError("unknown threading model")),
        }
    }
}

/// The executors a server runs, sharing one `ThreadAccounting`.
pub struct ExecutorSet {
    accounting: Arc<ThreadAccounting>,
    synchronous: Arc<SynchronousExecutor>,
    fixed: Arc<FixedExecutor>,
    reserved: Arc<ReservedExecutor>,
}

impl ExecutorSet {
    /// Build (but do not start) every executor from `config`
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let accounting = Arc::new(ThreadAccounting::new());
        Ok(Self {
            synchronous: Arc::new(SynchronousExecutor::new(&config, Arc::clone(&accounting))),
            fixed: Arc::new(FixedExecutor::new(&config, Arc::clone(&accounting))),
            reserved: Arc::new(ReservedExecutor::new(&config, Arc::clone(&accounting))),
            accounting,
        })
    }

    /// Initialize logging and build from `SVX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        kprint::init();
        Self::new(ExecutorConfig::from_env())
    }

    pub fn start(&self) -> Result<(), LaunchError> {
        self.synchronous.start()?;
        self.fixed.start()?;
        self.reserved.start()?;
        kinfo!(
            "executors started ({} threads running)",
            self.accounting.running()
        );
        Ok(())
    }

    /// Executor serving `model`
    pub fn executor_for(&self, model: ThreadingModel) -> Arc<dyn Executor> {
        match model {
            ThreadingModel::Dedicated => self.synchronous.clone(),
            ThreadingModel::Borrowed => self.fixed.clone(),
        }
    }

    /// Executor for a new client.
    ///
    /// Exempt clients of the borrowed model overflow into the reserved
    /// executor while the fixed pool is saturated.
    pub fn executor_for_client(&self, model: ThreadingModel, exempt: bool) -> Arc<dyn Executor> {
        if model == ThreadingModel::Borrowed && exempt && self.fixed.is_saturated() {
            ktrace!("fixed pool saturated, routing exempt client to reserve");
            return self.reserved.clone();
        }
        self.executor_for(model)
    }

    #[inline]
    pub fn synchronous(&self) -> &Arc<SynchronousExecutor> {
        &self.synchronous
    }

    #[inline]
    pub fn fixed(&self) -> &Arc<FixedExecutor> {
        &self.fixed
    }

    #[inline]
    pub fn reserved(&self) -> &Arc<ReservedExecutor> {
        &self.reserved
    }

    #[inline]
    pub fn accounting(&self) -> &Arc<ThreadAccounting> {
        &self.accounting
    }

    fn all(&self) -> [Arc<dyn Executor>; 3] {
        [
            self.synchronous.clone(),
            self.fixed.clone(),
            self.reserved.clone(),
        ]
    }

    /// Shut every executor down within one overall `deadline`.
    ///
    /// Returns each executor's name and report.
    pub fn shutdown(&self, deadline: Duration) -> Vec<(&'static str, ShutdownReport)> {
        let until = Instant::now() + deadline;
        self.all()
            .iter()
            .map(|exec| {
                let remaining = until.saturating_duration_since(Instant::now());
                (exec.name(), exec.shutdown(remaining))
            })
            .collect()
    }

    pub fn stats(&self) -> Vec<(&'static str, ExecutorStats)> {
        self.all()
            .iter()
            .map(|exec| (exec.name(), exec.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config() -> ExecutorConfig {
        ExecutorConfig::new()
            .pool_threads(1)
            .reserved_threads(1)
            .reserved_max_threads(2)
            .thread_name_prefix("svx-test")
    }

    #[test]
    fn test_threading_model_parse() {
        assert_eq!("dedicated".parse::<ThreadingModel>().unwrap(), ThreadingModel::Dedicated);
        assert_eq!(
            " Pool-Of-Threads ".parse::<ThreadingModel>().unwrap(),
            ThreadingModel::Borrowed
        );
        assert!("fibers".parse::<ThreadingModel>().is_err());
        assert_eq!(ThreadingModel::Borrowed.to_string(), "borrowed");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ExecutorSet::new(config().pool_threads(0)).is_err());
    }

    #[test]
    fn test_routing() {
        let set = ExecutorSet::new(config()).unwrap();
        set.start().unwrap();
        assert_eq!(set.executor_for(ThreadingModel::Dedicated).name(), "synchronous");
        assert_eq!(set.executor_for(ThreadingModel::Borrowed).name(), "fixed");
        assert_eq!(
            set.executor_for_client(ThreadingModel::Dedicated, true).name(),
            "synchronous"
        );

        // Occupy the only pool worker and leave one task queued.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        let pool = set.executor_for(ThreadingModel::Borrowed);
        pool.schedule(Task::from_fn(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        pool.schedule(Task::from_fn(|| {})).unwrap();

        assert_eq!(
            set.executor_for_client(ThreadingModel::Borrowed, true).name(),
            "reserved"
        );
        assert_eq!(
            set.executor_for_client(ThreadingModel::Borrowed, false).name(),
            "fixed"
        );

        release_tx.send(()).unwrap();
        let reports = set.shutdown(Duration::from_secs(2));
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|(_, r)| r.drained));
        for (_, stats) in set.stats() {
            assert_eq!(stats.threads, 0);
        }
        assert_eq!(set.accounting().running(), 0);
    }

    #[test]
    fn test_executors_share_accounting() {
        let set = ExecutorSet::new(config()).unwrap();
        set.start().unwrap();
        // each pool: 1 worker + reactor (Linux)
        assert!(set.accounting().running() >= 2);
        assert!(set.accounting().launched() >= 2);
        set.shutdown(Duration::from_secs(2));
        assert_eq!(set.accounting().running(), 0);
    }
}
