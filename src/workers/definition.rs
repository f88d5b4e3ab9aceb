//! # Long-running worker definitions.
//!
//! A [`WorkerDefinition`] describes a pool of identical long-running worker
//! processes: how many to keep alive, which account they run as, how long to
//! wait before replacing a crashed one, and the callbacks executed inside the
//! child process.
//!
//! Identities are allocated from a process-wide counter at construction time.
//! A re-executed child runs the same registration code in the same order, so
//! it arrives at the same identity and can find its own definition.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::reload::ReloadStrategy;
use crate::workers::context::WorkerContext;
use crate::workers::worker_fn::{WorkerCallback, WorkerFn};

static NEXT_WORKER_ID: AtomicU32 = AtomicU32::new(1);

/// Default delay before a crashed worker is replaced.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(250);

/// Stable identity of a worker or periodic definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub(crate) fn next() -> Self {
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which pool a child process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// Long-running worker kept alive by the supervisor.
    Worker,
    /// Short-lived job launched by the scheduler.
    Periodic,
}

impl ProcessKind {
    /// Short stable label used in the child bootstrap environment.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Worker => "worker",
            ProcessKind::Periodic => "periodic",
        }
    }
}

/// Account a child process switches to before running user code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name; `None` keeps the master's user.
    pub user: Option<String>,
    /// Group name; `None` keeps the master's group.
    pub group: Option<String>,
}

impl Credentials {
    /// True when neither user nor group is overridden.
    pub fn is_inherited(&self) -> bool {
        self.user.is_none() && self.group.is_none()
    }
}

/// Common view over worker and periodic definitions used by the pool.
pub trait Definition: Send + Sync + 'static {
    /// Stable identity.
    fn id(&self) -> WorkerId;
    /// Human readable name.
    fn name(&self) -> &str;
    /// Account the child runs as.
    fn credentials(&self) -> &Credentials;
}

/// Factory creating a fresh reload strategy inside each child.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn ReloadStrategy> + Send + Sync>;

/// # Definition of a long-running worker pool.
///
/// ```rust
/// use std::time::Duration;
/// use procvisor::{WorkerContext, WorkerDefinition, WorkerError};
///
/// let def = WorkerDefinition::new("web")
///     .with_count(4)
///     .with_restart_delay(Duration::from_millis(100))
///     .on_start(|ctx: WorkerContext| async move {
///         ctx.cancelled().await;
///         Ok::<_, WorkerError>(())
///     });
///
/// assert_eq!(def.count(), 4);
/// assert!(def.is_reloadable());
/// ```
#[derive(Clone)]
pub struct WorkerDefinition {
    id: WorkerId,
    name: String,
    count: usize,
    reloadable: bool,
    credentials: Credentials,
    restart_delay: Duration,
    on_start: Option<WorkerCallback>,
    on_stop: Option<WorkerCallback>,
    on_reload: Option<WorkerCallback>,
    reload_strategies: Vec<StrategyFactory>,
}

impl WorkerDefinition {
    /// Creates a definition with one process, reloadable, inheriting credentials.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkerId::next(),
            name: name.into(),
            count: 1,
            reloadable: true,
            credentials: Credentials::default(),
            restart_delay: DEFAULT_RESTART_DELAY,
            on_start: None,
            on_stop: None,
            on_reload: None,
            reload_strategies: Vec::new(),
        }
    }

    /// Target number of live processes.
    ///
    /// Zero is rejected with [`PoolError::ZeroCount`](crate::PoolError::ZeroCount)
    /// when the definition is registered with a supervisor.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Whether a reload request replaces processes gracefully (SIGUSR1) or
    /// terminates them (SIGTERM).
    pub fn with_reloadable(mut self, reloadable: bool) -> Self {
        self.reloadable = reloadable;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.credentials.user = Some(user.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.credentials.group = Some(group.into());
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Runs inside the child once it has connected to the master.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.on_start = Some(WorkerFn::arc(f));
        self
    }

    /// Runs inside the child when it was asked to stop.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.on_stop = Some(WorkerFn::arc(f));
        self
    }

    /// Runs inside the child when it is about to exit for a reload.
    pub fn on_reload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.on_reload = Some(WorkerFn::arc(f));
        self
    }

    /// Adds a reload strategy; the factory is invoked once per child.
    pub fn with_reload_strategy<S, F>(mut self, factory: F) -> Self
    where
        S: ReloadStrategy,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.reload_strategies
            .push(Arc::new(move || Box::new(factory()) as Box<dyn ReloadStrategy>));
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_reloadable(&self) -> bool {
        self.reloadable
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub(crate) fn start_callback(&self) -> Option<&WorkerCallback> {
        self.on_start.as_ref()
    }

    pub(crate) fn stop_callback(&self) -> Option<&WorkerCallback> {
        self.on_stop.as_ref()
    }

    pub(crate) fn reload_callback(&self) -> Option<&WorkerCallback> {
        self.on_reload.as_ref()
    }

    pub(crate) fn build_reload_strategies(&self) -> Vec<Box<dyn ReloadStrategy>> {
        self.reload_strategies.iter().map(|f| f()).collect()
    }
}

impl Definition for WorkerDefinition {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl fmt::Debug for WorkerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("count", &self.count)
            .field("reloadable", &self.reloadable)
            .field("credentials", &self.credentials)
            .field("restart_delay", &self.restart_delay)
            .field("reload_strategies", &self.reload_strategies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::EachRequestReloadStrategy;

    #[test]
    fn identities_are_unique() {
        let a = WorkerDefinition::new("a");
        let b = WorkerDefinition::new("b");
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }

    #[test]
    fn count_is_kept_as_given() {
        assert_eq!(WorkerDefinition::new("web").with_count(0).count(), 0);
        assert_eq!(WorkerDefinition::new("web").with_count(3).count(), 3);
    }

    #[test]
    fn defaults() {
        let def = WorkerDefinition::new("web");
        assert_eq!(def.count(), 1);
        assert!(def.is_reloadable());
        assert!(def.credentials().is_inherited());
        assert_eq!(def.restart_delay(), DEFAULT_RESTART_DELAY);
        assert!(def.start_callback().is_none());
    }

    #[test]
    fn strategy_factories_build_fresh_instances() {
        let def = WorkerDefinition::new("web")
            .with_reload_strategy(EachRequestReloadStrategy::new)
            .with_user("nobody");
        assert_eq!(def.build_reload_strategies().len(), 1);
        assert_eq!(def.build_reload_strategies().len(), 1);
        assert_eq!(def.credentials().user.as_deref(), Some("nobody"));
    }
}
