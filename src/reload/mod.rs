//! # Worker self-reload strategies.
//!
//! Strategies run inside worker processes. When one decides the worker should
//! be replaced, the [`ReloadTrigger`] callback stops the worker with
//! [`RELOAD_EXIT_CODE`](crate::RELOAD_EXIT_CODE) and the master respawns it
//! without treating the exit as a crash.
//!
//! Event-driven strategies are consulted through
//! [`WorkerContext::on_request`](crate::WorkerContext::on_request) and
//! [`WorkerContext::report_error`](crate::WorkerContext::report_error); timer
//! strategies run on their own interval.

mod policies;
mod strategy;
mod trigger;

pub use policies::{
    EachRequestReloadStrategy, ExceptionReloadStrategy, MaxMemoryReloadStrategy,
    MaxRequestsReloadStrategy, MemoryProbe, TtlReloadStrategy,
};
pub use strategy::{ReloadEvent, ReloadStrategy};
pub use trigger::{ReloadCallback, ReloadTrigger};
