//! # OS signal handling for the master and its children.
//!
//! ## Master
//! - `SIGINT`, `SIGTERM`, `SIGQUIT` → [`MasterSignal::Stop`]
//! - `SIGUSR1` → [`MasterSignal::Reload`]
//!
//! ## Children
//! - `SIGTERM` → [`ChildSignal::Stop`]
//! - `SIGUSR1` → [`ChildSignal::Reload`]
//! - `SIGINT` is swallowed: Ctrl-C in a terminal reaches the whole process
//!   group, and only the master decides how children stop.

use tokio::signal::unix::{Signal, SignalKind, signal};

/// Signal received by the master process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSignal {
    Stop,
    Reload,
}

/// Signal listeners of the master process.
///
/// Listeners are installed on construction, so a signal arriving between two
/// [`recv`](Self::recv) calls is not lost.
pub struct MasterSignals {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
    sigusr1: Signal,
}

impl MasterSignals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
            sigusr1: signal(SignalKind::user_defined1())?,
        })
    }

    pub async fn recv(&mut self) -> MasterSignal {
        tokio::select! {
            _ = self.sigint.recv()  => MasterSignal::Stop,
            _ = self.sigterm.recv() => MasterSignal::Stop,
            _ = self.sigquit.recv() => MasterSignal::Stop,
            _ = self.sigusr1.recv() => MasterSignal::Reload,
        }
    }
}

/// Signal received by a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSignal {
    Stop,
    Reload,
}

/// Signal listeners of a child process.
pub struct ChildSignals {
    sigint: Signal,
    sigterm: Signal,
    sigusr1: Signal,
}

impl ChildSignals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigusr1: signal(SignalKind::user_defined1())?,
        })
    }

    pub async fn recv(&mut self) -> ChildSignal {
        loop {
            tokio::select! {
                _ = self.sigint.recv()  => continue,
                _ = self.sigterm.recv() => return ChildSignal::Stop,
                _ = self.sigusr1.recv() => return ChildSignal::Reload,
            }
        }
    }
}
