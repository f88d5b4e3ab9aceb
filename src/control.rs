//! # Client-side control of a running master.
//!
//! [`Control`] backs the command-line surface (`stop`, `reload`, `status`,
//! ...) without printing anything: liveness comes from the pid file, every
//! other answer is read over the bus socket.
//!
//! ```no_run
//! use procvisor::{Config, Control};
//!
//! # async fn demo() -> Result<(), procvisor::RuntimeError> {
//! let control = Control::for_current_exe(&Config::default())?;
//! for process in control.processes().await? {
//!     println!("{} {} {}", process.pid, process.name, process.memory);
//! }
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::config::Config;
use crate::error::RuntimeError;
use crate::messages::{CONNECTIONS_KEY, Message, MessageBus, MessageBusExt, STATUS_KEY, SocketClient};
use crate::paths::RuntimePaths;
use crate::subscribers::{ProcessInfo, ServerStatus, WorkerInfo};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra wait on top of the master's stop timeout before `stop` gives up.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct Control {
    paths: RuntimePaths,
    client: SocketClient,
    stop_wait: Duration,
}

impl Control {
    pub fn new(paths: RuntimePaths, config: &Config) -> Self {
        let client = SocketClient::new(&paths.socket)
            .with_backoff(config.connect_backoff, config.connect_attempts_clamped());
        Self {
            paths,
            client,
            stop_wait: config.stop_timeout + STOP_GRACE,
        }
    }

    /// Control for the master started from the running executable.
    pub fn for_current_exe(config: &Config) -> Result<Self, RuntimeError> {
        Ok(Self::new(RuntimePaths::for_current_exe(config)?, config))
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    pub fn is_running(&self) -> bool {
        self.paths.running_pid().is_some()
    }

    /// Pid of the running master, or [`RuntimeError::NotRunning`].
    pub fn ensure_running(&self) -> Result<i32, RuntimeError> {
        self.paths.running_pid().ok_or(RuntimeError::NotRunning)
    }

    /// Fails with [`RuntimeError::AlreadyRunning`] when a master is alive.
    pub fn ensure_stopped(&self) -> Result<(), RuntimeError> {
        match self.paths.running_pid() {
            Some(pid) => Err(RuntimeError::AlreadyRunning { pid }),
            None => Ok(()),
        }
    }

    /// Asks the master to stop and waits until its process is gone.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let pid = self.ensure_running()?;
        if let Err(e) = self.client.dispatch(Message::StopServer).await {
            // the master may close the socket before answering
            debug!(pid, error = %e, "stop request not acknowledged");
        }

        let deadline = Instant::now() + self.stop_wait;
        while self.paths.running_pid() == Some(pid) {
            if Instant::now() >= deadline {
                return Err(RuntimeError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("server (pid {pid}) did not stop in time"),
                )));
            }
            sleep(STOP_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Asks the master to reload its workers; does not wait for the replacements.
    pub async fn reload(&self) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        self.client.dispatch(Message::ReloadServer).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ServerStatus, RuntimeError> {
        self.ensure_running()?;
        self.client
            .request(Message::container_get(STATUS_KEY))
            .await?
            .ok_or(RuntimeError::NotRunning)
    }

    /// Long-running worker definitions.
    pub async fn workers(&self) -> Result<Vec<WorkerInfo>, RuntimeError> {
        Ok(self.status().await?.workers().cloned().collect())
    }

    pub async fn processes(&self) -> Result<Vec<ProcessInfo>, RuntimeError> {
        Ok(self.status().await?.processes)
    }

    /// Periodic definitions with their last and next runs.
    pub async fn scheduler(&self) -> Result<Vec<WorkerInfo>, RuntimeError> {
        Ok(self.status().await?.periodic().cloned().collect())
    }

    /// Open connections published by workers; empty when nothing published them.
    pub async fn connections(&self) -> Result<Vec<Value>, RuntimeError> {
        self.ensure_running()?;
        let connections: Option<Vec<Value>> = self
            .client
            .request(Message::container_get(CONNECTIONS_KEY))
            .await?;
        Ok(connections.unwrap_or_default())
    }
}
