//! # Jitter policy for randomized delays.
//!
//! [`JitterPolicy`] adds randomness to delays so that many processes acting on
//! the same cadence do not act in lockstep. It is used by the socket client
//! connect backoff and by [`JitterTrigger`](crate::triggers::JitterTrigger).
//!
//! - [`JitterPolicy::None`]: no randomization, the delay is used as-is
//! - [`JitterPolicy::Full`]: uniform delay in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + uniform[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of a delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// Use the exact delay.
    #[default]
    None,

    /// Uniform random delay in `[0, delay]`.
    ///
    /// A jittered schedule uses this to spread a `jitter` window evenly.
    Full,

    /// `delay/2 + uniform[0, delay/2]`.
    ///
    /// Keeps at least half of the base delay; used for retry loops.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay (millisecond resolution).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
        }
    }
}

/// Full jitter: random[0, delay]
fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Equal jitter: delay/2 + random[0, delay/2]
fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}
