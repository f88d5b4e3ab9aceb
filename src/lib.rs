//! # procvisor
//!
//! **Procvisor** is a single-host process supervisor for tokio applications.
//!
//! The binary that registers the workers is also the binary the workers run
//! in: the master re-executes itself once per child process, and every child
//! reports back to the master over a unix socket message bus.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────────┐   ┌──────────────────┐   ┌─────────────────────────┐
//!     │ WorkerDefinition │   │ WorkerDefinition │   │PeriodicWorkerDefinition │
//!     │  (count = 4)     │   │  (count = 1)     │   │  ("*/5 * * * *")        │
//!     └────────┬─────────┘   └────────┬─────────┘   └────────────┬────────────┘
//!              ▼                      ▼                          ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │  Server (master process)                                                  │
//! │  - Supervisor  (worker pool, heartbeats, crash/reload handling)           │
//! │  - Scheduler   (periodic pool, triggers, skip-on-overlap)                 │
//! │  - LocalBus    (handlers per MessageKind)                                 │
//! │  - Container + StatusTracker (ServerStatus under "server_status")         │
//! └──────┬───────────────────────────────┬──────────────────────────▲────────┘
//!        │ re-exec current_exe           │ re-exec current_exe      │
//!        │ PROCVISOR_CHILD=worker:<id>   │ PROCVISOR_CHILD=         │ unix socket
//!        ▼                               ▼   periodic:<id>          │ (length-delimited JSON)
//!     ┌──────────────┐ ┌──────────────┐ ┌──────────────┐            │
//!     │ worker child │ │ worker child │ │periodic child│────────────┤
//!     │  on_start    │ │  on_start    │ │  on_start    │            │
//!     │  heartbeats ─┼─┼──────────────┼─┼──────────────┼────────────┘
//!     └──────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! ### Exit codes
//! ```text
//! 0   clean exit         → replaced at once
//! 100 reload requested   → replaced at once
//! *   crash              → replaced after restart_delay
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                                   |
//! |-------------------|----------------------------------------------------------|------------------------------------------------------|
//! | **Workers**       | Long-running and periodic process definitions.           | [`WorkerDefinition`], [`PeriodicWorkerDefinition`]   |
//! | **Supervision**   | Pool sizing, restarts, graceful stop with kill deadline. | [`Supervisor`], [`Scheduler`], [`Server`]            |
//! | **Triggers**      | Fixed date-time, cron, interval and jittered schedules.  | [`Trigger`], [`from_schedule`]                       |
//! | **Reload**        | Self-reload strategies evaluated inside workers.         | [`ReloadStrategy`], [`ReloadTrigger`]                |
//! | **Message bus**   | In-process and unix socket request/response transport.   | [`MessageBus`], [`LocalBus`], [`SocketClient`]       |
//! | **Control**       | Stop, reload and query a running master.                 | [`Control`], [`ServerStatus`]                        |
//! | **Errors**        | Typed errors with stable labels.                         | [`RuntimeError`], [`WorkerError`]                    |
//!
//! ## Example
//! ```no_run
//! use procvisor::{
//!     Config, MaxRequestsReloadStrategy, Server, WorkerContext, WorkerDefinition, logging,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     logging::init(logging::LogConfig::default().with_env_overrides());
//!
//!     let web = WorkerDefinition::new("web")
//!         .with_count(4)
//!         .with_reload_strategy(|| MaxRequestsReloadStrategy::new(1000, 20))
//!         .on_start(|ctx: WorkerContext| async move {
//!             // serve until asked to stop
//!             ctx.cancelled().await;
//!             Ok(())
//!         });
//!
//!     let runtime = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()?;
//!     let code = runtime.block_on(Server::new(Config::default()).add_worker(web).run())?;
//!     std::process::exit(code);
//! }
//! ```
mod config;
mod control;
mod core;
mod error;
mod messages;
mod paths;
mod policies;
mod reload;
mod subscribers;
mod triggers;
mod workers;

pub mod logging;

// ---- Public re-exports ----

pub use config::Config;
pub use control::Control;
pub use crate::core::{
    CHILD_ENV, ChildEnv, ChildRole, CommandSpawner, ExitNotice, ExitSender, PoolStatus,
    ProcessRecord, SOCKET_ENV, Scheduler, SchedulerHandle, Server, SpawnRequest, Spawner,
    Supervisor, SupervisorHandle, WorkerPool, current_memory, is_child_process, peak_memory,
};
pub use error::{BusError, PoolError, RuntimeError, ScheduleError, WorkerError};
pub use messages::{
    CONNECTIONS_KEY, Container, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, Handler, LocalBus,
    Message, MessageBus, MessageBusExt, MessageHandler, MessageKind, Reply, STATUS_KEY,
    SocketClient, SocketServer, SubscriptionId, codec,
};
pub use paths::RuntimePaths;
pub use policies::{BackoffPolicy, ExitKind, JitterPolicy, RELOAD_EXIT_CODE};
pub use reload::{
    EachRequestReloadStrategy, ExceptionReloadStrategy, MaxMemoryReloadStrategy,
    MaxRequestsReloadStrategy, MemoryProbe, ReloadCallback, ReloadEvent, ReloadStrategy,
    ReloadTrigger, TtlReloadStrategy,
};
pub use subscribers::{LogWriter, ProcessInfo, ServerStatus, StatusTracker, WorkerInfo};
pub use triggers::{
    Clock, CronExpressionTrigger, DateTimeTrigger, JitterTrigger, PeriodicTrigger, Trigger,
    from_schedule, parse_interval, system_clock,
};
pub use workers::{
    BoxWorkerFuture, Callback, Credentials, DEFAULT_RESTART_DELAY, Definition, PeriodicWorkerDefinition,
    ProcessKind, StrategyFactory, WorkerCallback, WorkerContext, WorkerDefinition, WorkerFn, WorkerId,
};
