//! # svcexec-core
//!
//! Core types and traits for the service executor.
//!
//! This crate is platform-agnostic and carries no external dependencies.
//! Thread launching, worker pools and readiness multiplexing live in
//! `svcexec-runtime`.
//!
//! ## Modules
//!
//! - `error` - `LaunchError` / `RejectedError`
//! - `state` - executor lifecycle state, shutdown report, stats snapshot
//! - `task` - single-shot `Task` and its `TaskStatus`
//! - `session` - the `Session` boundary trait and readiness outcomes
//! - `executor` - the `Executor` trait
//! - `readiness` - default blocking readiness waiter
//! - `kprint` - leveled stderr logging macros
//! - `env` - environment variable utilities

pub mod error;
pub mod state;
pub mod task;
pub mod session;
pub mod executor;
pub mod readiness;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use error::{LaunchError, LaunchResult, RejectedError, SubmitResult};
pub use state::{ExecutorState, ExecutorStats, ShutdownReport};
pub use task::{Task, TaskStatus};
pub use session::{ReadyCallback, Readiness, Session, SessionHandle, SessionId, SessionOutcome};
pub use executor::Executor;
pub use readiness::{schedule_callback_on_data_available, wait_for_data, CallbackSlot};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_ms};
