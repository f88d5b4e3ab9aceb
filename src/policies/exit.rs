//! # Exit classification for supervised processes.
//!
//! [`ExitKind`] decides what the supervisor does after a worker process has
//! been reaped. The decision depends only on the exit code:
//!
//! ```text
//! 0                 → Clean   → respawn immediately if the pool is below target
//! RELOAD_EXIT_CODE  → Reload  → log as reload, respawn immediately
//! anything else     → Crash   → log a warning, respawn after `restart_delay`
//! ```
//!
//! Processes killed by a signal are reported as `128 + signo`, the usual shell
//! convention, so an external `kill -9` shows up as a crash with code 137.

use std::process::ExitStatus;

/// Exit code a worker uses to request a respawn without being counted as a crash.
pub const RELOAD_EXIT_CODE: i32 = 100;

/// Outcome of a reaped worker process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0.
    Clean,
    /// [`RELOAD_EXIT_CODE`].
    Reload,
    /// Any other code, including signal terminations.
    Crash,
}

impl ExitKind {
    /// Classifies a raw exit code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitKind::Clean,
            RELOAD_EXIT_CODE => ExitKind::Reload,
            _ => ExitKind::Crash,
        }
    }
}

/// Flattens an [`ExitStatus`] into a single code (`128 + signo` for signals).
pub fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    status.code().unwrap_or(1)
}
