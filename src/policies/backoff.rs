//! # Backoff policy for bounded retry loops.
//!
//! [`BackoffPolicy`] controls how retry delays grow between attempts. The
//! socket client uses it while the master's listener is not bound yet.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then
//! jitter is applied. The base is derived from the attempt number only, so
//! jitter output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(25),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(25));
//! assert_eq!(backoff.next(2), Duration::from_millis(100));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to each computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Short exponential backoff tuned for the client connect race:
    /// `first = 25ms`, `factor = 2.0`, `max = 1s`, equal jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(25),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max: Duration, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max,
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let policy = plain(25, Duration::from_secs(30), 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(25));
        assert_eq!(policy.next(1), Duration::from_millis(50));
        assert_eq!(policy.next(3), Duration::from_millis(200));
    }

    #[test]
    fn clamped_to_max() {
        let policy = plain(100, Duration::from_secs(1), 2.0);
        assert_eq!(policy.next(10), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_exceeding_max_is_clamped() {
        let policy = plain(10_000, Duration::from_secs(5), 2.0);
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn default_policy_stays_bounded() {
        let policy = BackoffPolicy::default();
        for attempt in 0..20 {
            let delay = policy.next(attempt);
            assert!(delay <= Duration::from_secs(1), "attempt {attempt}: {delay:?}");
        }
    }
}
