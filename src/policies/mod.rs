//! Timing and exit policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized actions
//! - [`ExitKind`]      what a reaped worker's exit code means to the supervisor
//!
//! ## Quick wiring
//! ```text
//! SocketClient::connect   └─► BackoffPolicy::next(attempt) between connect attempts
//! JitterTrigger::next_run └─► JitterPolicy::Full.apply(jitter)
//! Supervisor::on_exit     └─► ExitKind::from_code(code) → respawn now / later
//! ```

mod backoff;
mod exit;
mod jitter;

pub use backoff::BackoffPolicy;
pub use exit::{ExitKind, RELOAD_EXIT_CODE, exit_code};
pub use jitter::JitterPolicy;
