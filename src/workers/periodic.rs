//! # Periodic job definitions.
//!
//! A [`PeriodicWorkerDefinition`] is launched by the scheduler according to its
//! schedule string. At most one instance of a definition runs at a time.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::WorkerError;
use crate::workers::context::WorkerContext;
use crate::workers::definition::{Credentials, Definition, WorkerId};
use crate::workers::worker_fn::{WorkerCallback, WorkerFn};

/// Definition of a scheduled job.
///
/// ```rust
/// use std::time::Duration;
/// use procvisor::{PeriodicWorkerDefinition, WorkerContext, WorkerError};
///
/// let job = PeriodicWorkerDefinition::new("cleanup", "*/5 * * * *")
///     .with_jitter(Duration::from_secs(10))
///     .on_start(|_ctx: WorkerContext| async move { Ok::<_, WorkerError>(()) });
///
/// assert_eq!(job.schedule(), "*/5 * * * *");
/// ```
#[derive(Clone)]
pub struct PeriodicWorkerDefinition {
    id: WorkerId,
    name: String,
    schedule: String,
    jitter: Duration,
    credentials: Credentials,
    on_start: Option<WorkerCallback>,
}

impl PeriodicWorkerDefinition {
    /// Creates a definition. The schedule is validated when the scheduler starts.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: WorkerId::next(),
            name: name.into(),
            schedule: schedule.into(),
            jitter: Duration::ZERO,
            credentials: Credentials::default(),
            on_start: None,
        }
    }

    /// Upper bound of the random delay added to every computed run time.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
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

    /// The job body; the child exits once it returns.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.on_start = Some(WorkerFn::arc(f));
        self
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    pub(crate) fn start_callback(&self) -> Option<&WorkerCallback> {
        self.on_start.as_ref()
    }
}

impl Definition for PeriodicWorkerDefinition {
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

impl fmt::Debug for PeriodicWorkerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicWorkerDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("jitter", &self.jitter)
            .field("credentials", &self.credentials)
            .finish()
    }
}
