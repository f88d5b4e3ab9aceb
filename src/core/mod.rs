//! Runtime core: process orchestration and lifecycle.
//!
//! - [`server`]: entry point dispatching to master or child mode;
//! - [`supervisor`]: keeps long-running worker pools at their target size;
//! - [`scheduler`]: launches periodic jobs from their triggers;
//! - [`pool`]: definition and process bookkeeping owned by one actor;
//! - [`spawner`]: child process creation and signalling;
//! - [`child`]: bootstrap of a re-executed child process;
//! - [`signals`]: OS signal handling for master and children;
//! - [`memory`]: resident memory of the current process.

mod child;
mod memory;
mod pool;
mod scheduler;
mod server;
mod signals;
mod spawner;
mod supervisor;

#[cfg(test)]
mod testing;

pub use child::{CHILD_ENV, ChildEnv, ChildRole, SOCKET_ENV, is_child_process};
pub use memory::{current_memory, peak_memory};
pub use pool::{PoolStatus, ProcessRecord, WorkerPool};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use server::Server;
pub use spawner::{CommandSpawner, ExitNotice, ExitSender, SpawnRequest, Spawner};
pub use supervisor::{Supervisor, SupervisorHandle};
