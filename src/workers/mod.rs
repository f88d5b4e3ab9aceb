//! # Worker and periodic job definitions.
//!
//! - [`WorkerDefinition`]: a pool of long-running processes kept at a target count.
//! - [`PeriodicWorkerDefinition`]: a job launched on a schedule.
//! - [`WorkerContext`]: what the callbacks of both see inside the child process.
//! - [`WorkerFn`]: closure adapter behind every callback.

mod context;
mod definition;
mod periodic;
mod worker_fn;

pub(crate) use context::ExitLatch;
pub use context::WorkerContext;
pub use definition::{
    Credentials, DEFAULT_RESTART_DELAY, Definition, ProcessKind, StrategyFactory,
    WorkerDefinition, WorkerId,
};
pub use periodic::PeriodicWorkerDefinition;
pub use worker_fn::{BoxWorkerFuture, Callback, WorkerCallback, WorkerFn};
