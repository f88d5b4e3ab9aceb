use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::reload::strategy::{ReloadEvent, ReloadStrategy};

/// Callback performing the graceful self-stop.
pub type ReloadCallback = Arc<dyn Fn() + Send + Sync>;

/// Aggregates a worker's reload strategies around one reload callback.
pub struct ReloadTrigger {
    event_strategies: Vec<Box<dyn ReloadStrategy>>,
    timer_strategies: Vec<Box<dyn ReloadStrategy>>,
    on_reload: ReloadCallback,
}

impl ReloadTrigger {
    pub fn new(strategies: Vec<Box<dyn ReloadStrategy>>, on_reload: ReloadCallback) -> Self {
        let (timer_strategies, event_strategies) =
            strategies.into_iter().partition(|s| s.interval().is_some());
        Self {
            event_strategies,
            timer_strategies,
            on_reload,
        }
    }

    /// Asks each event strategy in order; reloads on the first `true`.
    pub fn emit(&mut self, event: &ReloadEvent<'_>) -> bool {
        for strategy in &mut self.event_strategies {
            if strategy.should_reload(event) {
                (self.on_reload)();
                return true;
            }
        }
        false
    }

    /// Moves every timer strategy onto its own recurring timer.
    ///
    /// A timer stops after it triggered a reload or when `token` is cancelled.
    pub fn spawn_timers(&mut self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        self.timer_strategies
            .drain(..)
            .filter_map(|mut strategy| {
                let period = strategy.interval()?;
                let on_reload = self.on_reload.clone();
                let token = token.clone();
                Some(tokio::spawn(async move {
                    let mut ticks = interval_at(Instant::now() + period, period);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticks.tick() => {
                                if strategy.should_reload(&ReloadEvent::Tick) {
                                    debug!(period_ms = period.as_millis() as u64, "timer strategy requested reload");
                                    on_reload();
                                    break;
                                }
                            }
                        }
                    }
                }))
            })
            .collect()
    }
}
