//! Built-in reload strategies.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::core::peak_memory;
use crate::reload::strategy::{ReloadEvent, ReloadStrategy};

/// Reloads after every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct EachRequestReloadStrategy;

impl EachRequestReloadStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ReloadStrategy for EachRequestReloadStrategy {
    fn should_reload(&mut self, event: &ReloadEvent<'_>) -> bool {
        matches!(event, ReloadEvent::Request)
    }
}

/// Reloads once the request count exceeds a threshold drawn at random from
/// `[max - max * dispersion%, max]`, so sibling workers do not restart together.
#[derive(Debug, Clone)]
pub struct MaxRequestsReloadStrategy {
    threshold: u64,
    requests: u64,
}

impl MaxRequestsReloadStrategy {
    pub const DEFAULT_MAX_REQUESTS: u64 = 1000;
    pub const DEFAULT_DISPERSION: u8 = 20;

    /// `dispersion` is a percentage and is capped at 100.
    pub fn new(max_requests: u64, dispersion: u8) -> Self {
        let dispersion = u64::from(dispersion.min(100));
        let spread = max_requests.saturating_mul(dispersion).saturating_add(50) / 100;
        let low = max_requests.saturating_sub(spread);
        let threshold = if low >= max_requests {
            max_requests
        } else {
            rand::rng().random_range(low..=max_requests)
        };
        Self {
            threshold,
            requests: 0,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl Default for MaxRequestsReloadStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_REQUESTS, Self::DEFAULT_DISPERSION)
    }
}

impl ReloadStrategy for MaxRequestsReloadStrategy {
    fn should_reload(&mut self, event: &ReloadEvent<'_>) -> bool {
        if !matches!(event, ReloadEvent::Request) {
            return false;
        }
        self.requests += 1;
        self.requests > self.threshold
    }
}

/// Source of the memory figure compared against the ceiling.
pub type MemoryProbe = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Timer-driven; reloads once peak memory exceeds `max_memory` bytes.
pub struct MaxMemoryReloadStrategy {
    max_memory: u64,
    interval: Duration,
    probe: MemoryProbe,
}

impl MaxMemoryReloadStrategy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            interval: Self::DEFAULT_INTERVAL,
            probe: Arc::new(peak_memory),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe(mut self, probe: MemoryProbe) -> Self {
        self.probe = probe;
        self
    }
}

impl ReloadStrategy for MaxMemoryReloadStrategy {
    fn should_reload(&mut self, _event: &ReloadEvent<'_>) -> bool {
        (self.probe)() > self.max_memory
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Timer-driven; reloads every `ttl`.
#[derive(Debug, Clone, Copy)]
pub struct TtlReloadStrategy {
    ttl: Duration,
}

impl TtlReloadStrategy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl ReloadStrategy for TtlReloadStrategy {
    fn should_reload(&mut self, _event: &ReloadEvent<'_>) -> bool {
        true
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.ttl)
    }
}

/// Reloads on any worker error whose label is not allow-listed.
#[derive(Debug, Clone)]
pub struct ExceptionReloadStrategy {
    allowed: Vec<String>,
}

impl ExceptionReloadStrategy {
    /// Allows `http_error`, so expected client errors keep the worker running.
    pub fn new() -> Self {
        Self::with_allowed(["http_error"])
    }

    pub fn with_allowed<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: labels.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for ExceptionReloadStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadStrategy for ExceptionReloadStrategy {
    fn should_reload(&mut self, event: &ReloadEvent<'_>) -> bool {
        match event {
            ReloadEvent::Error(err) => !self.allowed.iter().any(|l| l == err.as_label()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    #[test]
    fn each_request_ignores_errors() {
        let mut s = EachRequestReloadStrategy::new();
        assert!(s.should_reload(&ReloadEvent::Request));
        assert!(!s.should_reload(&ReloadEvent::Error(&WorkerError::fail("x"))));
        assert!(s.interval().is_none());
    }

    #[test]
    fn max_requests_threshold_within_dispersion() {
        for _ in 0..50 {
            let s = MaxRequestsReloadStrategy::new(1000, 20);
            assert!((800..=1000).contains(&s.threshold()));
        }
        assert_eq!(MaxRequestsReloadStrategy::new(10, 0).threshold(), 10);
    }

    #[test]
    fn max_requests_fires_after_threshold() {
        let mut s = MaxRequestsReloadStrategy::new(3, 0);
        assert!(!s.should_reload(&ReloadEvent::Request));
        assert!(!s.should_reload(&ReloadEvent::Request));
        assert!(!s.should_reload(&ReloadEvent::Request));
        assert!(s.should_reload(&ReloadEvent::Request));
    }

    #[test]
    fn max_memory_uses_probe() {
        let mut low = MaxMemoryReloadStrategy::new(1024).with_probe(Arc::new(|| 512));
        let mut high = MaxMemoryReloadStrategy::new(1024).with_probe(Arc::new(|| 2048));
        assert!(!low.should_reload(&ReloadEvent::Tick));
        assert!(high.should_reload(&ReloadEvent::Tick));
        assert_eq!(low.interval(), Some(MaxMemoryReloadStrategy::DEFAULT_INTERVAL));
    }

    #[test]
    fn ttl_always_reloads() {
        let mut s = TtlReloadStrategy::new(Duration::from_secs(60));
        assert!(s.should_reload(&ReloadEvent::Tick));
        assert_eq!(s.interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn exception_respects_allow_list() {
        let mut s = ExceptionReloadStrategy::new();
        let http = WorkerError::Http {
            status: 404,
            error: "not found".into(),
        };
        assert!(!s.should_reload(&ReloadEvent::Error(&http)));
        assert!(s.should_reload(&ReloadEvent::Error(&WorkerError::fatal("boom"))));
        assert!(!s.should_reload(&ReloadEvent::Request));

        let mut strict = ExceptionReloadStrategy::with_allowed(Vec::<String>::new());
        assert!(strict.should_reload(&ReloadEvent::Error(&http)));
    }
}
