//! Executor configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use svcexec_runtime::config::ExecutorConfig;
//!
//! let config = ExecutorConfig::from_env()
//!     .pool_threads(8)
//!     .queue_capacity(4096);
//! config.validate()?;
//! ```

pub mod defaults;

use core::fmt;
use std::time::Duration;
use svcexec_core::env::{env_get, env_get_ms};

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid executor config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Settings shared by the launcher and every executor variant.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Fixed-pool worker count
    pub pool_threads: usize,
    /// Fixed-pool queue bound (0 = unbounded)
    pub queue_capacity: usize,
    /// Reserved executor: idle threads kept ready
    pub reserved_threads: usize,
    /// Reserved executor: growth ceiling
    pub reserved_max_threads: usize,
    /// Blocking waiter threads in the readiness dispatcher
    pub max_waiters: usize,
    /// Launched thread stack size (0 = derive from rlimit)
    pub stack_size: usize,
    /// Running launched threads allowed per accounting scope (0 = unlimited)
    pub max_launched_threads: usize,
    /// Surplus reserved threads exit after idling this long
    pub idle_timeout: Duration,
    /// epoll events per reactor wakeup
    pub reactor_events: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ExecutorConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SVX_POOL_THREADS` - Fixed-pool workers
    /// - `SVX_QUEUE_CAPACITY` - Fixed-pool queue bound, 0 = unbounded
    /// - `SVX_RESERVED_THREADS` - Reserved idle threads
    /// - `SVX_RESERVED_MAX_THREADS` - Reserved growth ceiling
    /// - `SVX_MAX_WAITERS` - Blocking readiness waiter threads
    /// - `SVX_STACK_SIZE` - Thread stack bytes, 0 = from rlimit
    /// - `SVX_MAX_LAUNCHED_THREADS` - Running thread cap, 0 = none
    /// - `SVX_IDLE_TIMEOUT_MS` - Reserved surplus idle timeout
    /// - `SVX_REACTOR_EVENTS` - epoll batch size
    pub fn from_env() -> Self {
        Self {
            pool_threads: env_get("SVX_POOL_THREADS", defaults::pool_threads()),
            queue_capacity: env_get("SVX_QUEUE_CAPACITY", defaults::QUEUE_CAPACITY),
            reserved_threads: env_get("SVX_RESERVED_THREADS", defaults::RESERVED_THREADS),
            reserved_max_threads: env_get(
                "SVX_RESERVED_MAX_THREADS",
                defaults::RESERVED_MAX_THREADS,
            ),
            max_waiters: env_get("SVX_MAX_WAITERS", defaults::MAX_WAITERS),
            stack_size: env_get("SVX_STACK_SIZE", defaults::STACK_SIZE),
            max_launched_threads: env_get(
                "SVX_MAX_LAUNCHED_THREADS",
                defaults::MAX_LAUNCHED_THREADS,
            ),
            idle_timeout: env_get_ms("SVX_IDLE_TIMEOUT_MS", defaults::IDLE_TIMEOUT),
            reactor_events: env_get("SVX_REACTOR_EVENTS", defaults::REACTOR_EVENTS),
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Library defaults only (no env override).
    /// Useful for tests.
    pub fn new() -> Self {
        Self {
            pool_threads: defaults::pool_threads(),
            queue_capacity: defaults::QUEUE_CAPACITY,
            reserved_threads: defaults::RESERVED_THREADS,
            reserved_max_threads: defaults::RESERVED_MAX_THREADS,
            max_waiters: defaults::MAX_WAITERS,
            stack_size: defaults::STACK_SIZE,
            max_launched_threads: defaults::MAX_LAUNCHED_THREADS,
            idle_timeout: defaults::IDLE_TIMEOUT,
            reactor_events: defaults::REACTOR_EVENTS,
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
        }
    }

    pub fn pool_threads(mut self, n: usize) -> Self {
        self.pool_threads = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn reserved_threads(mut self, n: usize) -> Self {
        self.reserved_threads = n;
        self
    }

    pub fn reserved_max_threads(mut self, n: usize) -> Self {
        self.reserved_max_threads = n;
        self
    }

    pub fn max_waiters(mut self, n: usize) -> Self {
        self.max_waiters = n;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn max_launched_threads(mut self, n: usize) -> Self {
        self.max_launched_threads = n;
        self
    }

    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.idle_timeout = d;
        self
    }

    pub fn reactor_events(mut self, n: usize) -> Self {
        self.reactor_events = n;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Queue bound as an option (`None` = unbounded)
    #[inline]
    pub fn queue_bound(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }

    /// Thread cap as an option (`None` = unlimited)
    #[inline]
    pub fn thread_limit(&self) -> Option<usize> {
        (self.max_launched_threads > 0).then_some(self.max_launched_threads)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_threads == 0 {
            return Err(ConfigError("pool_threads must be at least 1"));
        }
        if self.pool_threads > defaults::MAX_POOL_THREADS {
            return Err(ConfigError("pool_threads exceeds maximum"));
        }
        if self.reserved_max_threads == 0 {
            return Err(ConfigError("reserved_max_threads must be at least 1"));
        }
        if self.reserved_threads > self.reserved_max_threads {
            return Err(ConfigError("reserved_threads exceeds reserved_max_threads"));
        }
        if self.max_waiters == 0 {
            return Err(ConfigError("max_waiters must be at least 1"));
        }
        if self.reactor_events == 0 {
            return Err(ConfigError("reactor_events must be at least 1"));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(ConfigError("thread_name_prefix contains NUL"));
        }
        Ok(())
    }
}
