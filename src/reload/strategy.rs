use std::time::Duration;

use crate::error::WorkerError;

/// What a worker reports to its reload strategies.
#[derive(Debug, Clone, Copy)]
pub enum ReloadEvent<'a> {
    /// A unit of work (request) was handled.
    Request,
    /// User code failed.
    Error(&'a WorkerError),
    /// A timer strategy's interval elapsed.
    Tick,
}

/// Policy deciding when a worker should replace itself.
///
/// Strategies returning `Some` from [`interval`](ReloadStrategy::interval) are
/// timer-driven: they are asked with [`ReloadEvent::Tick`] on that cadence and
/// are not consulted for other events.
pub trait ReloadStrategy: Send + 'static {
    fn should_reload(&mut self, event: &ReloadEvent<'_>) -> bool;

    fn interval(&self) -> Option<Duration> {
        None
    }
}
