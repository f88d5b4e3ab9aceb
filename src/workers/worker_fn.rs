//! # Function-backed worker callbacks.
//!
//! A [`WorkerFn`] wraps a closure `F: Fn(WorkerContext) -> Fut`, producing a fresh
//! future per invocation. Callbacks run inside the child process only; the
//! master never calls them.
//!
//! ## Example
//! ```rust
//! use procvisor::{WorkerContext, WorkerError, WorkerFn};
//!
//! let cb = WorkerFn::arc(|ctx: WorkerContext| async move {
//!     ctx.cancelled().await;
//!     Ok::<_, WorkerError>(())
//! });
//! # let _ = cb;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::WorkerError;
use crate::workers::context::WorkerContext;

/// Boxed future returned by a worker callback.
pub type BoxWorkerFuture = Pin<Box<dyn Future<Output = Result<(), WorkerError>> + Send + 'static>>;

/// Shared handle to a worker callback.
pub type WorkerCallback = Arc<dyn Callback>;

/// Object-safe callback invoked with the worker's context.
pub trait Callback: Send + Sync + 'static {
    /// Creates a new future for this invocation.
    fn call(&self, ctx: WorkerContext) -> BoxWorkerFuture;
}

/// Function-backed callback implementation.
pub struct WorkerFn<F> {
    f: F,
}

impl<F> WorkerFn<F> {
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it as a shared [`WorkerCallback`].
    pub fn arc<Fut>(f: F) -> WorkerCallback
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Callback for WorkerFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn call(&self, ctx: WorkerContext) -> BoxWorkerFuture {
        Box::pin((self.f)(ctx))
    }
}
