//! In-memory spawner for supervisor and scheduler tests.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;

use nix::sys::signal::Signal;
use parking_lot::Mutex;

use crate::core::spawner::{ExitNotice, ExitSender, SpawnRequest, Spawner};
use crate::error::RuntimeError;
use crate::policies::RELOAD_EXIT_CODE;
use crate::workers::WorkerId;

#[derive(Default)]
struct State {
    next_pid: u32,
    alive: BTreeSet<u32>,
    owners: HashMap<u32, WorkerId>,
    exits: HashMap<u32, ExitSender>,
    signals: Vec<(u32, Signal)>,
    spawned: Vec<u32>,
    fail_spawns: bool,
}

/// Fake processes that react to signals the way a cooperative worker would.
///
/// SIGTERM exits with 0 and SIGUSR1 with the reload code unless `stubborn`,
/// SIGKILL always exits with 137.
#[derive(Clone, Default)]
pub(crate) struct FakeSpawner {
    state: Arc<Mutex<State>>,
    stubborn: bool,
}

impl FakeSpawner {
    pub(crate) fn new() -> Self {
        let spawner = Self::default();
        spawner.state.lock().next_pid = 1000;
        spawner
    }

    /// Processes ignore SIGTERM and SIGUSR1.
    pub(crate) fn stubborn() -> Self {
        Self {
            stubborn: true,
            ..Self::new()
        }
    }

    pub(crate) fn fail_spawns(&self) {
        self.state.lock().fail_spawns = true;
    }

    /// Terminates `pid` from outside with the given exit code.
    pub(crate) fn exit(&self, pid: u32, code: i32) {
        let mut state = self.state.lock();
        if state.alive.remove(&pid)
            && let Some(tx) = state.exits.remove(&pid)
        {
            let _ = tx.send(ExitNotice { pid, code });
        }
    }

    pub(crate) fn alive(&self) -> Vec<u32> {
        self.state.lock().alive.iter().copied().collect()
    }

    pub(crate) fn alive_for(&self, id: WorkerId) -> Vec<u32> {
        let state = self.state.lock();
        state
            .alive
            .iter()
            .copied()
            .filter(|pid| state.owners.get(pid) == Some(&id))
            .collect()
    }

    pub(crate) fn spawned(&self) -> Vec<u32> {
        self.state.lock().spawned.clone()
    }

    pub(crate) fn signals(&self) -> Vec<(u32, Signal)> {
        self.state.lock().signals.clone()
    }

    pub(crate) fn signals_of(&self, signal: Signal) -> Vec<u32> {
        self.signals()
            .into_iter()
            .filter(|(_, s)| *s == signal)
            .map(|(pid, _)| pid)
            .collect()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest, exits: ExitSender) -> Result<u32, RuntimeError> {
        let mut state = self.state.lock();
        if state.fail_spawns {
            return Err(RuntimeError::Spawn {
                worker: request.name.clone(),
                reason: "fork failed".into(),
            });
        }
        state.next_pid += 1;
        let pid = state.next_pid;
        state.alive.insert(pid);
        state.owners.insert(pid, request.worker_id);
        state.exits.insert(pid, exits);
        state.spawned.push(pid);
        Ok(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let code = {
            let mut state = self.state.lock();
            state.signals.push((pid, signal));
            if !state.alive.contains(&pid) {
                return Err(io::Error::from(nix::errno::Errno::ESRCH));
            }
            match signal {
                Signal::SIGKILL => Some(137),
                Signal::SIGTERM if !self.stubborn => Some(0),
                Signal::SIGUSR1 if !self.stubborn => Some(RELOAD_EXIT_CODE),
                _ => None,
            }
        };
        if let Some(code) = code {
            self.exit(pid, code);
        }
        Ok(())
    }
}
