//! # svcexec-runtime
//!
//! Thread-backed implementations of the `svcexec-core` executor interface.
//!
//! This crate provides:
//! - `ThreadLauncher` and shared `ThreadAccounting`
//! - `Lifecycle`, the per-executor shutdown & admission controller
//! - `SynchronousExecutor` - one launched thread per task / session wait
//! - `FixedExecutor` - bounded pool with multiplexed readiness dispatch
//! - `ReservedExecutor` - overflow pool that grows and shrinks on demand
//! - `TcpSession` - `Session` over a `std::net::TcpStream` (Unix)
//! - `ExecutorConfig` with env overrides

pub mod config;
pub mod launcher;
pub mod lifecycle;
pub mod synchronous;
pub mod fixed;
pub mod reserved;

mod locks;
mod queue;
mod readiness;
mod stats;
mod turnstile;
mod waitset;

#[cfg(test)]
mod test_util;

// Re-exports
pub use config::{ConfigError, ExecutorConfig};
pub use launcher::{AccountingSnapshot, ThreadAccounting, ThreadLauncher, WorkerHandle};
pub use lifecycle::{Admission, Lifecycle, StartOutcome};
pub use synchronous::SynchronousExecutor;
pub use fixed::FixedExecutor;
pub use reserved::ReservedExecutor;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod session;
        pub use session::TcpSession;
    }
}
