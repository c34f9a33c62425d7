//! Library defaults for `ExecutorConfig`

use std::time::Duration;

/// Upper bound on fixed-pool workers
pub const MAX_POOL_THREADS: usize = 1024;

/// Pending-task queue bound; 0 means unbounded
pub const QUEUE_CAPACITY: usize = 0;

/// Idle threads the reserved executor keeps ready
pub const RESERVED_THREADS: usize = 1;

/// Ceiling for the reserved executor's dynamic growth
pub const RESERVED_MAX_THREADS: usize = 64;

/// Blocking waiter threads for sessions without a pollable descriptor
pub const MAX_WAITERS: usize = 4;

/// Stack size for launched threads; 0 derives it from `RLIMIT_STACK`
pub const STACK_SIZE: usize = 0;

/// Process-wide cap on running launched threads; 0 means no cap
pub const MAX_LAUNCHED_THREADS: usize = 0;

/// How long a surplus reserved thread idles before exiting
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// epoll events fetched per reactor wakeup
pub const REACTOR_EVENTS: usize = 256;

/// Prefix for launched thread names
pub const THREAD_NAME_PREFIX: &str = "svx";

/// Fixed-pool size: one worker per CPU, at least 2
pub fn pool_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, MAX_POOL_THREADS)
}
