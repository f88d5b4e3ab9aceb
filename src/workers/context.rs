//! # Context handed to worker callbacks.
//!
//! [`WorkerContext`] is the child-side view of the runtime: it exposes the
//! worker's identity, the message bus connected to the master, cooperative
//! cancellation and the hooks that drive reload strategies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{BusError, WorkerError};
use crate::messages::{Message, MessageBus};
use crate::policies::RELOAD_EXIT_CODE;
use crate::reload::{ReloadEvent, ReloadTrigger};
use crate::workers::definition::{ProcessKind, WorkerId};

/// Cancellation token paired with the exit code the child will report.
///
/// The first stop request wins; later ones keep the original code.
#[derive(Debug, Default)]
pub(crate) struct ExitLatch {
    token: CancellationToken,
    code: Mutex<Option<i32>>,
}

impl ExitLatch {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims the exit code and cancels the token; false when already claimed.
    pub(crate) fn stop(&self, code: i32) -> bool {
        let mut slot = self.code.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(code);
        self.token.cancel();
        true
    }

    /// Claimed code, or 0 when nobody asked for a stop.
    pub(crate) fn code(&self) -> i32 {
        self.code.lock().unwrap_or(0)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

struct Inner {
    id: WorkerId,
    name: String,
    kind: ProcessKind,
    pid: u32,
    bus: Arc<dyn MessageBus>,
    latch: Arc<ExitLatch>,
    detached: AtomicBool,
    reload: Mutex<Option<ReloadTrigger>>,
}

/// Handle passed to `on_start`, `on_stop` and `on_reload` callbacks.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct WorkerContext {
    inner: Arc<Inner>,
}

impl WorkerContext {
    pub(crate) fn new(
        id: WorkerId,
        name: impl Into<String>,
        kind: ProcessKind,
        bus: Arc<dyn MessageBus>,
        latch: Arc<ExitLatch>,
        reload: Option<ReloadTrigger>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                name: name.into(),
                kind,
                pid: std::process::id(),
                bus,
                latch,
                detached: AtomicBool::new(false),
                reload: Mutex::new(reload),
            }),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ProcessKind {
        self.inner.kind
    }

    /// Pid of the current (child) process.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Bus client connected to the master.
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.inner.bus
    }

    /// Token cancelled when the worker was asked to stop or reload.
    pub fn token(&self) -> CancellationToken {
        self.inner.latch.token().clone()
    }

    /// Completes once the worker was asked to stop or reload.
    pub async fn cancelled(&self) {
        self.inner.latch.token().cancelled().await
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.latch.token().is_cancelled()
    }

    /// Asks the worker to finish with the given exit code.
    pub fn stop(&self, code: i32) {
        self.inner.latch.stop(code);
    }

    /// Asks the worker to exit so the master replaces it with a fresh process.
    pub fn reload(&self) {
        debug!(worker = %self.inner.name, pid = self.inner.pid, "worker requested reload");
        self.inner.latch.stop(RELOAD_EXIT_CODE);
    }

    /// Stops heartbeats and tells the master to stop tracking liveness.
    ///
    /// Used by workers that hand their process over to another program.
    pub async fn detach(&self) -> Result<(), BusError> {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner
            .bus
            .dispatch(Message::ProcessDetached {
                pid: self.inner.pid,
            })
            .await?;
        Ok(())
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Notifies reload strategies that a request was handled.
    ///
    /// Returns true when a strategy triggered a reload.
    pub fn on_request(&self) -> bool {
        self.emit(&ReloadEvent::Request)
    }

    /// Logs a worker error and forwards it to reload strategies.
    ///
    /// Returns true when a strategy triggered a reload.
    pub fn report_error(&self, err: &WorkerError) -> bool {
        error!(
            worker = %self.inner.name,
            pid = self.inner.pid,
            label = err.as_label(),
            error = %err,
            "worker error"
        );
        self.emit(&ReloadEvent::Error(err))
    }

    pub(crate) fn emit(&self, event: &ReloadEvent<'_>) -> bool {
        match self.inner.reload.lock().as_mut() {
            Some(trigger) => trigger.emit(event),
            None => false,
        }
    }

    pub(crate) fn latch(&self) -> &Arc<ExitLatch> {
        &self.inner.latch
    }
}
