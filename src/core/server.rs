//! # Server: the entry point shared by the master and its children.
//!
//! The same [`Server`] registration runs in every process. [`Server::run`]
//! looks at the child bootstrap environment first: a child runs its single
//! definition and returns its exit code, the master runs the supervisor and
//! the scheduler until it is told to stop.
//!
//! ## Master lifecycle
//! ```text
//! run()
//!  ├─► pid file check (AlreadyRunning) ─► write pid file ─► bind socket
//!  ├─► LocalBus + Container + StatusTracker (+ LogWriter)
//!  ├─► spawn Supervisor and Scheduler
//!  ├─► loop:
//!  │     SIGINT/SIGTERM/SIGQUIT, StopServer ─► break
//!  │     SIGUSR1, ReloadServer              ─► reload workers
//!  │     supervisor failed                  ─► break with error
//!  └─► stop scheduler + supervisor ─► close socket ─► remove pid file
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::core::child::{ChildEnv, run_child};
use crate::core::pool::PoolStatus;
use crate::core::scheduler::Scheduler;
use crate::core::signals::{MasterSignal, MasterSignals};
use crate::core::spawner::{CommandSpawner, Spawner};
use crate::core::supervisor::{Supervisor, SupervisorHandle};
use crate::error::RuntimeError;
use crate::messages::{Container, LocalBus, Message, MessageHandler, MessageKind, SocketServer};
use crate::paths::RuntimePaths;
use crate::subscribers::{LogWriter, StatusTracker};
use crate::workers::{PeriodicWorkerDefinition, WorkerDefinition};

/// Worker and periodic-worker registration plus the process entry point.
///
/// ```no_run
/// use procvisor::{Config, PeriodicWorkerDefinition, Server, WorkerContext, WorkerDefinition};
///
/// # async fn demo() -> Result<(), procvisor::RuntimeError> {
/// let code = Server::new(Config::default().with_env_overrides())
///     .add_worker(WorkerDefinition::new("web").with_count(4).on_start(
///         |ctx: WorkerContext| async move {
///             ctx.cancelled().await;
///             Ok(())
///         },
///     ))
///     .add_periodic_worker(PeriodicWorkerDefinition::new("cleanup", "*/5 * * * *"))
///     .run()
///     .await?;
/// std::process::exit(code);
/// # }
/// ```
pub struct Server {
    config: Config,
    paths: Option<RuntimePaths>,
    workers: Vec<WorkerDefinition>,
    periodic: Vec<PeriodicWorkerDefinition>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            paths: None,
            workers: Vec::new(),
            periodic: Vec::new(),
        }
    }

    /// Overrides the socket and pid file locations derived from the executable.
    pub fn with_paths(mut self, paths: RuntimePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn add_worker(mut self, definition: WorkerDefinition) -> Self {
        self.workers.push(definition);
        self
    }

    pub fn add_periodic_worker(mut self, definition: PeriodicWorkerDefinition) -> Self {
        self.periodic.push(definition);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the master or, in a child, the definition it was started for.
    ///
    /// Returns the exit code the process should terminate with.
    pub async fn run(self) -> Result<i32, RuntimeError> {
        if let Some(env) = ChildEnv::from_env()? {
            return run_child(env, &self.config, &self.workers, &self.periodic).await;
        }
        self.run_master().await
    }

    async fn run_master(self) -> Result<i32, RuntimeError> {
        let paths = match self.paths {
            Some(paths) => paths,
            None => RuntimePaths::for_current_exe(&self.config)?,
        };
        if let Some(pid) = paths.running_pid() {
            return Err(RuntimeError::AlreadyRunning { pid });
        }
        paths.write_pid()?;

        let result = serve(self.config, &paths, self.workers, self.periodic).await;
        paths.remove_files();
        match &result {
            Ok(_) => info!(server = %paths.socket.display(), "server stopped"),
            Err(e) => error!(error = %e, label = e.as_label(), "server stopped on error"),
        }
        result
    }
}

async fn serve(
    config: Config,
    paths: &RuntimePaths,
    workers: Vec<WorkerDefinition>,
    periodic: Vec<PeriodicWorkerDefinition>,
) -> Result<i32, RuntimeError> {
    let bus = LocalBus::new();
    let container = Container::new();
    container.attach(bus.as_ref());
    let tracker = StatusTracker::new(config.name.clone(), container);
    if config.log_events {
        LogWriter::attach(bus.as_ref());
    }

    let spawner: Arc<dyn Spawner> = Arc::new(CommandSpawner::current_exe(&paths.socket)?);
    let mut supervisor = Supervisor::new(&config, spawner.clone(), bus.clone());
    for definition in workers {
        tracker.register_worker(&definition);
        supervisor.register(definition)?;
    }
    let mut scheduler = Scheduler::new(spawner, bus.clone());
    for definition in periodic {
        tracker.register_periodic(&definition);
        scheduler.register(definition)?;
    }
    tracker.attach(bus.as_ref());

    let supervisor_handle = supervisor.handle();
    let scheduler_handle = scheduler.handle();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    route_messages(&bus, &supervisor_handle, control_tx);

    let mut signals = MasterSignals::new()?;
    let socket = SocketServer::bind(&paths.socket)?.with_request_timeout(config.request_timeout);
    let token = CancellationToken::new();
    let listener = socket.serve(bus.clone(), token.clone());

    let mut supervisor_task = tokio::spawn(supervisor.run());
    let scheduler_task = tokio::spawn(scheduler.run());
    tracker.set_status(PoolStatus::Running);
    info!(
        server = %config.name,
        pid = std::process::id(),
        socket = %paths.socket.display(),
        "server started"
    );

    let mut fatal = None;
    let mut supervisor_done = false;
    loop {
        let request = tokio::select! {
            signal = signals.recv() => signal,
            Some(request) = control_rx.recv() => request,
            finished = &mut supervisor_task => {
                supervisor_done = true;
                fatal = supervisor_failure(finished);
                break;
            }
        };
        match request {
            MasterSignal::Stop => break,
            MasterSignal::Reload => {
                info!("reloading workers");
                supervisor_handle.reload();
            }
        }
    }

    info!("stopping server");
    tracker.set_status(PoolStatus::Stopping);
    tokio::join!(scheduler_handle.stop(), supervisor_handle.stop());
    if !supervisor_done {
        fatal = supervisor_failure((&mut supervisor_task).await);
    }
    if let Ok(Err(e)) = scheduler_task.await
        && fatal.is_none()
    {
        fatal = Some(e);
    }

    token.cancel();
    let _ = listener.await;
    tracker.set_status(PoolStatus::Shutdown);
    fatal.map_or(Ok(0), Err)
}

/// Wires messages the master reacts to onto the supervisor and the control loop.
fn route_messages(
    bus: &LocalBus,
    supervisor: &SupervisorHandle,
    control: mpsc::UnboundedSender<MasterSignal>,
) {
    let heartbeat = supervisor.clone();
    bus.subscribe(
        MessageKind::Heartbeat,
        Arc::new(move |m| {
            if let Message::Heartbeat { pid, memory } = m {
                heartbeat.heartbeat(*pid, *memory);
            }
            Value::Null
        }),
    );
    let detach = supervisor.clone();
    bus.subscribe(
        MessageKind::ProcessDetached,
        Arc::new(move |m| {
            if let Message::ProcessDetached { pid } = m {
                detach.detach(*pid);
            }
            Value::Null
        }),
    );
    for (kind, request) in [
        (MessageKind::StopServer, MasterSignal::Stop),
        (MessageKind::ReloadServer, MasterSignal::Reload),
    ] {
        let control = control.clone();
        bus.subscribe(
            kind,
            Arc::new(move |_| Value::Bool(control.send(request).is_ok())),
        );
    }
}

fn supervisor_failure(
    finished: Result<Result<(), RuntimeError>, tokio::task::JoinError>,
) -> Option<RuntimeError> {
    match finished {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) => Some(RuntimeError::Io(std::io::Error::other(e))),
    }
}
