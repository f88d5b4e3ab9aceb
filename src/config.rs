//! # Global runtime configuration.
//!
//! [`Config`] holds the settings shared by the master and its children:
//! where the socket and pid files live, how long a graceful stop may take,
//! heartbeat cadence and the client connect backoff.
//!
//! ## Sentinel values
//! - `stop_timeout = 0s` → no grace, remaining processes are killed immediately
//! - `heartbeat_period = 0s` → heartbeats and block detection disabled
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use procvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.name = "shop".into();
//! cfg.stop_timeout = Duration::from_secs(30);
//!
//! assert_eq!(cfg.heartbeat_interval(), Some(Duration::from_secs(2)));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server name; prefix of the socket and pid file names.
    pub name: String,
    /// Directory holding the socket and pid files.
    pub runtime_dir: PathBuf,
    /// Time workers get after SIGTERM before they are killed.
    pub stop_timeout: Duration,
    /// How often workers report liveness and the master checks for blocked ones.
    pub heartbeat_period: Duration,
    /// Silence after which a worker is marked blocked.
    pub block_threshold: Duration,
    /// Retry policy for connecting to the master socket.
    pub connect_backoff: BackoffPolicy,
    /// Connect attempts before giving up.
    pub connect_attempts: u32,
    /// Time the master waits for a request frame on an accepted connection.
    pub request_timeout: Duration,
    /// Log every lifecycle message at debug level.
    pub log_events: bool,
}

impl Config {
    /// Heartbeat cadence, `None` when disabled.
    #[inline]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        if self.heartbeat_period.is_zero() {
            None
        } else {
            Some(self.heartbeat_period)
        }
    }

    /// Connect attempts clamped to at least one.
    #[inline]
    pub fn connect_attempts_clamped(&self) -> u32 {
        self.connect_attempts.max(1)
    }

    /// Applies `PROCVISOR_NAME`, `PROCVISOR_RUNTIME_DIR` and
    /// `PROCVISOR_STOP_TIMEOUT` (seconds). Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = std::env::var("PROCVISOR_NAME")
            && !name.trim().is_empty()
        {
            self.name = name.trim().to_string();
        }
        if let Ok(dir) = std::env::var("PROCVISOR_RUNTIME_DIR")
            && !dir.is_empty()
        {
            self.runtime_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("PROCVISOR_STOP_TIMEOUT")
            && let Ok(secs) = secs.trim().parse::<u64>()
        {
            self.stop_timeout = Duration::from_secs(secs);
        }
        self
    }
}

impl Default for Config {
    /// - `name` = file stem of the running executable
    /// - `runtime_dir` = system temp dir
    /// - `stop_timeout = 10s`
    /// - `heartbeat_period = 2s`, `block_threshold = 6s`
    /// - `connect_backoff` = 25ms doubling up to 1s with equal jitter, 10 attempts
    /// - `request_timeout = 5s`
    fn default() -> Self {
        Self {
            name: default_name(),
            runtime_dir: std::env::temp_dir(),
            stop_timeout: Duration::from_secs(10),
            heartbeat_period: Duration::from_secs(2),
            block_threshold: Duration::from_secs(6),
            connect_backoff: BackoffPolicy::default(),
            connect_attempts: crate::messages::DEFAULT_CONNECT_ATTEMPTS,
            request_timeout: crate::messages::DEFAULT_REQUEST_TIMEOUT,
            log_events: false,
        }
    }
}

fn default_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "procvisor".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.stop_timeout, Duration::from_secs(10));
        assert_eq!(cfg.block_threshold, Duration::from_secs(6));
        assert_eq!(cfg.connect_attempts_clamped(), 10);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(!cfg.name.is_empty());
    }

    #[test]
    fn zero_heartbeat_disables() {
        let cfg = Config {
            heartbeat_period: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.heartbeat_interval(), None);
    }
}
