//! Error types used by the procvisor runtime, its message bus and worker code.
//!
//! This module defines the error enums shared across the crate:
//!
//! - [`RuntimeError`]: errors raised by the master runtime itself (fatal spawn
//!   failures, pool invariant violations, pid-file preconditions).
//! - [`PoolError`]: violations of the worker pool bookkeeping contract.
//! - [`ScheduleError`]: a periodic schedule string that cannot be turned into a trigger.
//! - [`BusError`]: transport failures of the message bus.
//! - [`WorkerError`]: errors raised by user code running inside a worker process.
//!
//! Every enum provides `as_label` returning a short stable snake_case label for logs.

use std::path::PathBuf;

use thiserror::Error;

use crate::workers::WorkerId;

/// # Errors produced by the master runtime.
///
/// `Spawn` and `Pool` are fatal: the master aborts instead of continuing with
/// a pool whose invariants can no longer be guaranteed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Creating a child process failed.
    #[error("failed to spawn process for worker '{worker}': {reason}")]
    Spawn {
        /// Name of the definition being spawned.
        worker: String,
        /// Underlying OS error message.
        reason: String,
    },

    /// Pool bookkeeping was violated.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A master process is already alive for this start script.
    #[error("server already running (pid {pid})")]
    AlreadyRunning {
        /// Pid read from the pid file.
        pid: i32,
    },

    /// No live master process was found.
    #[error("server is not running")]
    NotRunning,

    /// The child bootstrap environment names a definition this binary never registered.
    #[error("unknown child role '{role}'")]
    UnknownChild {
        /// Raw value of the bootstrap variable.
        role: String,
    },

    /// Filesystem or socket failure in the master.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// let err = RuntimeError::AlreadyRunning { pid: 42 };
    /// assert_eq!(err.as_label(), "runtime_already_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Spawn { .. } => "runtime_spawn_failed",
            RuntimeError::Pool(_) => "runtime_pool_violation",
            RuntimeError::AlreadyRunning { .. } => "runtime_already_running",
            RuntimeError::NotRunning => "runtime_not_running",
            RuntimeError::UnknownChild { .. } => "runtime_unknown_child",
            RuntimeError::Io(_) => "runtime_io",
            RuntimeError::Bus(_) => "runtime_bus",
        }
    }

    /// True for errors after which the master must not keep running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Spawn { .. } | RuntimeError::Pool(_))
    }
}

/// # Errors produced by [`WorkerPool`](crate::core::WorkerPool) bookkeeping.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The same definition identity was registered twice.
    #[error("worker definition {id} is already registered")]
    AlreadyRegistered {
        /// Offending identity.
        id: WorkerId,
    },

    /// A child was recorded for a definition the pool has never seen.
    #[error("worker definition {id} not found")]
    DefinitionNotFound {
        /// Unknown identity.
        id: WorkerId,
    },

    /// A long-running definition asked for zero processes.
    #[error("worker definition '{name}' has a process count of zero")]
    ZeroCount {
        /// Definition name.
        name: String,
    },
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::AlreadyRegistered { .. } => "pool_already_registered",
            PoolError::DefinitionNotFound { .. } => "pool_definition_not_found",
            PoolError::ZeroCount { .. } => "pool_zero_count",
        }
    }
}

/// # Errors produced while turning a schedule string into a trigger.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The schedule string is blank.
    #[error("schedule is empty")]
    Empty,

    /// The schedule could not be parsed by any trigger variant.
    #[error("invalid schedule '{schedule}': {reason}")]
    Invalid {
        /// Raw schedule string.
        schedule: String,
        /// Parser message.
        reason: String,
    },

    /// A recurring schedule resolved to a zero-length interval.
    #[error("schedule '{schedule}' resolves to a zero interval")]
    ZeroInterval {
        /// Raw schedule string.
        schedule: String,
    },
}

impl ScheduleError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScheduleError::Empty => "schedule_empty",
            ScheduleError::Invalid { .. } => "schedule_invalid",
            ScheduleError::ZeroInterval { .. } => "schedule_zero_interval",
        }
    }

    pub(crate) fn invalid(schedule: &str, reason: impl Into<String>) -> Self {
        ScheduleError::Invalid {
            schedule: schedule.to_string(),
            reason: reason.into(),
        }
    }
}

/// # Errors produced by message bus transports.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// Socket read/write failure.
    #[error("bus io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be (de)serialized.
    #[error("bus codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer announced a frame above the accepted size.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// The master socket never became connectable.
    #[error("could not connect to {path:?} after {attempts} attempts")]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The connection closed before a response frame arrived.
    #[error("connection closed before a response was received")]
    Closed,

    /// No complete request frame arrived in time.
    #[error("no request received within {timeout:?}")]
    Timeout {
        /// Configured request timeout.
        timeout: std::time::Duration,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Io(_) => "bus_io",
            BusError::Codec(_) => "bus_codec",
            BusError::FrameTooLarge { .. } => "bus_frame_too_large",
            BusError::Connect { .. } => "bus_connect",
            BusError::Closed => "bus_closed",
            BusError::Timeout { .. } => "bus_timeout",
        }
    }
}

/// # Errors produced by user code inside a worker process.
///
/// The label returned by [`WorkerError::as_label`] is what an
/// [`ExceptionReloadStrategy`](crate::reload::ExceptionReloadStrategy)
/// allow-list matches against.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Execution failed; the worker may keep serving.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error (includes panics caught in worker callbacks).
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// An expected protocol-level error answered to a client (e.g. a 404).
    #[error("http error {status}: {error}")]
    Http {
        /// Response status code.
        status: u16,
        /// The underlying error message.
        error: String,
    },

    /// Worker observed cancellation and stopped early.
    #[error("worker cancelled")]
    Canceled,
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs and allow-lists.
    ///
    /// # Example
    /// ```
    /// use procvisor::WorkerError;
    ///
    /// let err = WorkerError::Http { status: 404, error: "not found".into() };
    /// assert_eq!(err.as_label(), "http_error");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Fatal { .. } => "worker_fatal",
            WorkerError::Http { .. } => "http_error",
            WorkerError::Canceled => "worker_canceled",
        }
    }

    /// Shorthand for [`WorkerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        WorkerError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`WorkerError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        WorkerError::Fatal {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_runtime_errors() {
        let spawn = RuntimeError::Spawn {
            worker: "web".into(),
            reason: "EAGAIN".into(),
        };
        assert!(spawn.is_fatal());
        assert!(RuntimeError::from(PoolError::DefinitionNotFound { id: WorkerId(3) }).is_fatal());
        assert!(!RuntimeError::NotRunning.is_fatal());
    }

    #[test]
    fn worker_error_labels_are_stable() {
        assert_eq!(WorkerError::fail("x").as_label(), "worker_failed");
        assert_eq!(WorkerError::fatal("x").as_label(), "worker_fatal");
        assert_eq!(WorkerError::Canceled.as_label(), "worker_canceled");
    }
}
