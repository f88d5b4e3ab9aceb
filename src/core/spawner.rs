//! # Child process creation and signalling.
//!
//! The supervisor and the scheduler never create processes directly; they go
//! through a [`Spawner`]. [`CommandSpawner`] re-executes the current binary
//! with a bootstrap environment telling it which definition to run. Every
//! spawned child gets a waiter task that reaps it and posts an
//! [`ExitNotice`] to the owning actor.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{Signal, kill};
use nix::unistd::{Gid, Group, Pid, Uid, User, getgid, getuid};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::child::{CHILD_ENV, ChildRole, SOCKET_ENV};
use crate::error::RuntimeError;
use crate::policies::exit_code;
use crate::workers::{Credentials, Definition, ProcessKind, WorkerId};

/// Exit of a spawned child, as reaped by its waiter task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    pub pid: u32,
    pub code: i32,
}

/// Channel on which exit notices are delivered.
pub type ExitSender = mpsc::UnboundedSender<ExitNotice>;

/// What to start.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub kind: ProcessKind,
    pub worker_id: WorkerId,
    pub name: String,
    pub credentials: Credentials,
}

impl SpawnRequest {
    pub fn new(kind: ProcessKind, definition: &dyn Definition) -> Self {
        Self {
            kind,
            worker_id: definition.id(),
            name: definition.name().to_string(),
            credentials: definition.credentials().clone(),
        }
    }
}

/// Creates and signals child processes.
pub trait Spawner: Send + Sync + 'static {
    /// Starts a child and returns its pid. Its exit must later be posted on `exits`.
    fn spawn(&self, request: &SpawnRequest, exits: ExitSender) -> Result<u32, RuntimeError>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;
}

/// Spawner re-executing a program (normally the current binary) in child mode.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    socket: PathBuf,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, socket: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            socket: socket.into(),
        }
    }

    /// Re-executes the running binary with its original arguments.
    pub fn current_exe(socket: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            std::env::args_os().skip(1).collect(),
            socket,
        ))
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&self, request: &SpawnRequest, exits: ExitSender) -> Result<u32, RuntimeError> {
        let spawn_error = |reason: String| RuntimeError::Spawn {
            worker: request.name.clone(),
            reason,
        };

        let role = ChildRole {
            kind: request.kind,
            worker_id: request.worker_id,
        };
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(CHILD_ENV, role.to_string())
            .env(SOCKET_ENV, &self.socket)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        if let Some(ids) = resolve_credentials(&request.credentials).map_err(spawn_error)? {
            apply_credentials(&mut cmd, ids);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error("child exited before its pid was read".into()))?;

        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for child");
                    1
                }
            };
            debug!(pid, code, "child reaped");
            let _ = exits.send(ExitNotice { pid, code });
        });

        Ok(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        signal_pid(pid, signal)
    }
}

/// Sends `signal` to `pid`.
pub fn signal_pid(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
}

type Ids = (Option<Uid>, Option<Gid>);

/// Resolves names to ids; `None` when nothing needs to change.
fn resolve_credentials(credentials: &Credentials) -> Result<Option<Ids>, String> {
    if credentials.is_inherited() {
        return Ok(None);
    }

    let mut uid = None;
    let mut gid = None;
    if let Some(name) = &credentials.user {
        let user = User::from_name(name)
            .map_err(|e| format!("cannot look up user '{name}': {e}"))?
            .ok_or_else(|| format!("unknown user '{name}'"))?;
        if user.uid != getuid() {
            uid = Some(user.uid);
            // the user's primary group applies unless a group is given
            if credentials.group.is_none() && user.gid != getgid() {
                gid = Some(user.gid);
            }
        }
    }
    if let Some(name) = &credentials.group {
        let group = Group::from_name(name)
            .map_err(|e| format!("cannot look up group '{name}': {e}"))?
            .ok_or_else(|| format!("unknown group '{name}'"))?;
        if group.gid != getgid() {
            gid = Some(group.gid);
        }
    }

    if uid.is_none() && gid.is_none() {
        Ok(None)
    } else {
        Ok(Some((uid, gid)))
    }
}

/// Switches the child's account; supplementary groups are cleared when root drops to `uid`.
fn apply_credentials(cmd: &mut Command, (uid, gid): Ids) {
    if let Some(gid) = gid {
        cmd.gid(gid.as_raw());
    }
    if let Some(uid) = uid {
        cmd.uid(uid.as_raw());
    }
}
