//! # Supervisor: keeps long-running worker pools at their target size.
//!
//! The [`Supervisor`] is an actor owning the worker [`WorkerPool`]. Everything
//! that mutates the pool arrives on its loop: commands from
//! [`SupervisorHandle`], exit notices from child waiter tasks, heartbeat ticks
//! and the stop deadline. The pool is never shared, so it needs no lock.
//!
//! ## Exit handling
//! ```text
//! exit code ──► ExitKind::from_code
//!                 ├─ Clean  (0)   → fill to target now
//!                 ├─ Reload (100) → info!, fill to target now
//!                 └─ Crash  (*)   → warn!, fill to target after restart_delay
//! (only while Running; while Stopping an exit just shrinks the pool)
//! ```
//!
//! ## Stop
//! ```text
//! stop() ──► SIGTERM every pid ──► pool empty?          → done
//!                               └► stop_timeout elapsed → SIGKILL remaining, done
//! ```
//!
//! ## Rules
//! - States only move forward: Starting → Running → Stopping → Shutdown
//! - Failing to spawn or to record a child is fatal: the supervisor stops its
//!   workers and `run` returns the error
//! - Blocked detection is advisory; it logs and publishes, never kills

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::pool::{PoolStatus, WorkerPool};
use crate::core::spawner::{ExitNotice, SpawnRequest, Spawner};
use crate::error::{PoolError, RuntimeError};
use crate::messages::{LocalBus, Message};
use crate::policies::ExitKind;
use crate::workers::{Definition, ProcessKind, WorkerDefinition, WorkerId};

enum Command {
    Stop(oneshot::Sender<()>),
    Reload,
    Heartbeat { pid: u32, memory: u64 },
    Detach { pid: u32 },
    Respawn(WorkerId),
}

/// Cloneable handle for talking to a running [`Supervisor`].
///
/// Calls made after the supervisor finished are ignored.
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Stop(_) => write!(f, "Stop"),
            Command::Reload => write!(f, "Reload"),
            Command::Heartbeat { pid, .. } => write!(f, "Heartbeat({pid})"),
            Command::Detach { pid } => write!(f, "Detach({pid})"),
            Command::Respawn(id) => write!(f, "Respawn({id})"),
        }
    }
}

impl SupervisorHandle {
    /// Stops all workers; resolves once the pool is empty or the kill deadline forced it.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Stop(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Asks every worker to reload. Does not wait for the replacements.
    pub fn reload(&self) {
        let _ = self.tx.send(Command::Reload);
    }

    pub fn heartbeat(&self, pid: u32, memory: u64) {
        let _ = self.tx.send(Command::Heartbeat { pid, memory });
    }

    pub fn detach(&self, pid: u32) {
        let _ = self.tx.send(Command::Detach { pid });
    }
}

/// Actor driving the long-running worker pool.
pub struct Supervisor {
    stop_timeout: Duration,
    heartbeat_period: Option<Duration>,
    block_threshold: Duration,
    pool: WorkerPool<WorkerDefinition>,
    spawner: Arc<dyn Spawner>,
    bus: Arc<LocalBus>,
    status: PoolStatus,
    stop_waiters: Vec<oneshot::Sender<()>>,
    kill_deadline: Option<Instant>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    exits_tx: mpsc::UnboundedSender<ExitNotice>,
    exits_rx: mpsc::UnboundedReceiver<ExitNotice>,
    timers: CancellationToken,
}

impl Supervisor {
    pub fn new(config: &Config, spawner: Arc<dyn Spawner>, bus: Arc<LocalBus>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            stop_timeout: config.stop_timeout,
            heartbeat_period: config.heartbeat_interval(),
            block_threshold: config.block_threshold,
            pool: WorkerPool::new(),
            spawner,
            bus,
            status: PoolStatus::Starting,
            stop_waiters: Vec::new(),
            kill_deadline: None,
            commands_tx,
            commands_rx,
            exits_tx,
            exits_rx,
            timers: CancellationToken::new(),
        }
    }

    /// Adds a definition; a zero process count is rejected.
    pub fn register(&mut self, definition: WorkerDefinition) -> Result<(), PoolError> {
        if definition.count() == 0 {
            return Err(PoolError::ZeroCount {
                name: definition.name().to_string(),
            });
        }
        self.pool.register(definition).map(|_| ())
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Spawns every definition up to its count and runs until stopped.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let mut fatal = None;
        if let Err(e) = self.start() {
            fatal = Some(self.abort(e));
        }

        let mut heartbeat = self.heartbeat_period.map(|period| {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks
        });

        while self.status != PoolStatus::Shutdown {
            let step = tokio::select! {
                Some(cmd) = self.commands_rx.recv() => self.on_command(cmd),
                Some(exit) = self.exits_rx.recv() => self.on_exit(exit),
                _ = tick(&mut heartbeat) => {
                    self.check_heartbeats();
                    Ok(())
                }
                _ = deadline(self.kill_deadline) => {
                    self.force_kill();
                    Ok(())
                }
            };
            if let Err(e) = step
                && fatal.is_none()
            {
                fatal = Some(self.abort(e));
            }
        }

        self.timers.cancel();
        debug!("supervisor finished");
        fatal.map_or(Ok(()), Err)
    }

    fn start(&mut self) -> Result<(), RuntimeError> {
        self.status = PoolStatus::Starting;
        let ids: Vec<WorkerId> = self.pool.definitions().map(|d| d.id()).collect();
        for id in ids {
            self.fill_to_target(id)?;
        }
        self.status = PoolStatus::Running;
        info!(processes = self.pool.len(), "workers started");
        Ok(())
    }

    fn abort(&mut self, err: RuntimeError) -> RuntimeError {
        error!(error = %err, label = err.as_label(), "supervisor failed, stopping workers");
        self.begin_stop();
        err
    }

    fn fill_to_target(&mut self, id: WorkerId) -> Result<(), RuntimeError> {
        let definition = self
            .pool
            .definition(id)
            .cloned()
            .ok_or(PoolError::DefinitionNotFound { id })?;
        while self.pool.alive_count(id) < definition.count() {
            self.spawn_one(&definition)?;
        }
        Ok(())
    }

    fn spawn_one(&mut self, definition: &WorkerDefinition) -> Result<u32, RuntimeError> {
        let request = SpawnRequest::new(ProcessKind::Worker, definition);
        let pid = self.spawner.spawn(&request, self.exits_tx.clone())?;
        let record = self.pool.add_child(definition.id(), pid)?;
        let spawned = Message::ProcessSpawned {
            worker_id: definition.id(),
            name: definition.name().to_string(),
            kind: ProcessKind::Worker,
            pid,
            user: definition.credentials().user.clone(),
            started_at: record.started_at,
        };
        info!(worker = %definition.name(), pid, "worker process started");
        self.bus.dispatch_now(&spawned);
        Ok(pid)
    }

    fn on_command(&mut self, cmd: Command) -> Result<(), RuntimeError> {
        match cmd {
            Command::Stop(done) => {
                if self.status == PoolStatus::Shutdown {
                    let _ = done.send(());
                } else {
                    self.stop_waiters.push(done);
                    self.begin_stop();
                }
            }
            Command::Reload => self.reload(),
            Command::Heartbeat { pid, memory } => {
                if let Some(record) = self.pool.get_by_pid_mut(pid) {
                    record.last_heartbeat = Instant::now();
                    record.memory = memory;
                    if record.blocked {
                        record.blocked = false;
                        info!(pid, "worker event loop recovered");
                    }
                }
            }
            Command::Detach { pid } => {
                if let Some(record) = self.pool.get_by_pid_mut(pid) {
                    record.detached = true;
                    record.blocked = false;
                    info!(pid, "worker detached");
                }
            }
            Command::Respawn(id) => {
                if self.status == PoolStatus::Running {
                    self.fill_to_target(id)?;
                }
            }
        }
        Ok(())
    }

    fn on_exit(&mut self, exit: ExitNotice) -> Result<(), RuntimeError> {
        let Some(record) = self.pool.delete_child(exit.pid) else {
            debug!(pid = exit.pid, "exit of untracked pid ignored");
            return Ok(());
        };
        self.bus.dispatch_now(&Message::ProcessExited {
            worker_id: record.worker_id,
            kind: ProcessKind::Worker,
            pid: exit.pid,
            exit_code: exit.code,
        });

        match self.status {
            PoolStatus::Running => {
                let Some(definition) = self.pool.definition(record.worker_id).cloned() else {
                    return Ok(());
                };
                let name = definition.name();
                match ExitKind::from_code(exit.code) {
                    ExitKind::Clean => {
                        info!(worker = %name, pid = exit.pid, "worker process exited");
                        self.fill_to_target(record.worker_id)?;
                    }
                    ExitKind::Reload => {
                        info!(worker = %name, pid = exit.pid, "worker process reloaded");
                        self.fill_to_target(record.worker_id)?;
                    }
                    ExitKind::Crash => {
                        warn!(
                            worker = %name,
                            pid = exit.pid,
                            exit_code = exit.code,
                            restart_in_ms = definition.restart_delay().as_millis() as u64,
                            "worker process crashed"
                        );
                        self.schedule_respawn(record.worker_id, definition.restart_delay())?;
                    }
                }
            }
            PoolStatus::Stopping => {
                if self.pool.is_empty() {
                    self.complete_stop();
                }
            }
            PoolStatus::Starting | PoolStatus::Shutdown => {}
        }
        Ok(())
    }

    fn schedule_respawn(&mut self, id: WorkerId, delay: Duration) -> Result<(), RuntimeError> {
        if delay.is_zero() {
            return self.fill_to_target(id);
        }
        let tx = self.commands_tx.clone();
        let token = self.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = tx.send(Command::Respawn(id));
                }
            }
        });
        Ok(())
    }

    fn reload(&mut self) {
        if self.status != PoolStatus::Running {
            debug!(status = ?self.status, "reload ignored");
            return;
        }
        let targets: Vec<(u32, Signal)> = self
            .pool
            .records()
            .map(|record| {
                let reloadable = self
                    .pool
                    .definition(record.worker_id)
                    .is_some_and(|d| d.is_reloadable());
                let signal = if reloadable && !record.detached {
                    Signal::SIGUSR1
                } else {
                    Signal::SIGTERM
                };
                (record.pid, signal)
            })
            .collect();
        info!(processes = targets.len(), "reloading workers");
        for (pid, signal) in targets {
            self.send_signal(pid, signal);
        }
    }

    fn begin_stop(&mut self) {
        if matches!(self.status, PoolStatus::Stopping | PoolStatus::Shutdown) {
            return;
        }
        self.status = PoolStatus::Stopping;
        self.timers.cancel();

        let pids = self.pool.all_pids();
        info!(processes = pids.len(), "stopping workers");
        for pid in &pids {
            self.send_signal(*pid, Signal::SIGTERM);
        }
        if self.pool.is_empty() {
            self.complete_stop();
        } else {
            self.kill_deadline = Some(Instant::now() + self.stop_timeout);
        }
    }

    fn force_kill(&mut self) {
        self.kill_deadline = None;
        let pids = self.pool.all_pids();
        if !pids.is_empty() {
            warn!(
                processes = pids.len(),
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "workers did not stop in time, killing"
            );
        }
        for pid in pids {
            self.send_signal(pid, Signal::SIGKILL);
        }
        self.complete_stop();
    }

    fn complete_stop(&mut self) {
        self.status = PoolStatus::Shutdown;
        self.kill_deadline = None;
        for done in self.stop_waiters.drain(..) {
            let _ = done.send(());
        }
        info!("workers stopped");
    }

    fn check_heartbeats(&mut self) {
        let now = Instant::now();
        let threshold = self.block_threshold;
        let mut blocked = Vec::new();
        for record in self.pool.records_mut() {
            if record.detached || record.blocked {
                continue;
            }
            if now.saturating_duration_since(record.last_heartbeat) > threshold {
                record.blocked = true;
                blocked.push(record.pid);
            }
        }
        for pid in blocked {
            warn!(
                pid,
                threshold_ms = threshold.as_millis() as u64,
                "worker event loop blocked"
            );
            self.bus.dispatch_now(&Message::ProcessBlocked { pid });
        }
    }

    fn send_signal(&self, pid: u32, signal: Signal) {
        if let Err(e) = self.spawner.signal(pid, signal) {
            debug!(pid, signal = %signal, error = %e, "signal not delivered");
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeSpawner;
    use crate::messages::{MessageHandler, MessageKind};
    use parking_lot::Mutex;
    use tokio::task::JoinHandle;

    struct Harness {
        spawner: FakeSpawner,
        handle: SupervisorHandle,
        task: JoinHandle<Result<(), RuntimeError>>,
        events: Arc<Mutex<Vec<Message>>>,
    }

    fn start(spawner: FakeSpawner, definitions: Vec<WorkerDefinition>, config: Config) -> Harness {
        let bus = LocalBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            MessageKind::ProcessSpawned,
            MessageKind::ProcessExited,
            MessageKind::ProcessBlocked,
        ] {
            let events = events.clone();
            bus.subscribe(
                kind,
                Arc::new(move |m| {
                    events.lock().push(m.clone());
                    serde_json::Value::Null
                }),
            );
        }

        let mut supervisor = Supervisor::new(&config, Arc::new(spawner.clone()), bus);
        for def in definitions {
            supervisor.register(def).unwrap();
        }
        let handle = supervisor.handle();
        let task = tokio::spawn(supervisor.run());
        Harness {
            spawner,
            handle,
            task,
            events,
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn blocked_events(events: &Mutex<Vec<Message>>) -> usize {
        events
            .lock()
            .iter()
            .filter(|m| matches!(m, Message::ProcessBlocked { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn spawns_to_target_count() {
        let def = WorkerDefinition::new("web").with_count(3);
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;

        assert_eq!(h.spawner.alive_for(id).len(), 3);
        let spawned = h
            .events
            .lock()
            .iter()
            .filter(|m| matches!(m, Message::ProcessSpawned { worker_id, .. } if *worker_id == id))
            .count();
        assert_eq!(spawned, 3);

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_worker_is_replaced_after_restart_delay() {
        let def = WorkerDefinition::new("web")
            .with_count(2)
            .with_restart_delay(Duration::from_millis(250));
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;

        let before = h.spawner.alive_for(id);
        assert_eq!(before.len(), 2);

        h.spawner.exit(before[0], 137);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.spawner.alive_for(id), vec![before[1]]);

        sleep(Duration::from_millis(200)).await;
        let after = h.spawner.alive_for(id);
        assert_eq!(after.len(), 2);
        assert!(after.contains(&before[1]));
        assert!(!after.contains(&before[0]));

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn clean_and_reload_exits_respawn_immediately() {
        let def = WorkerDefinition::new("web").with_restart_delay(Duration::from_secs(60));
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;

        let first = h.spawner.alive_for(id)[0];
        h.spawner.exit(first, 0);
        settle().await;
        let second = h.spawner.alive_for(id);
        assert_eq!(second.len(), 1);
        assert_ne!(second[0], first);

        h.spawner.exit(second[0], 100);
        settle().await;
        let third = h.spawner.alive_for(id);
        assert_eq!(third.len(), 1);
        assert_ne!(third[0], second[0]);

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_terminates_every_worker() {
        let def = WorkerDefinition::new("web").with_count(2);
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;
        let pids = h.spawner.alive();

        let started = Instant::now();
        h.handle.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(h.spawner.signals_of(Signal::SIGTERM), pids);
        assert!(h.spawner.signals_of(Signal::SIGKILL).is_empty());
        assert!(h.spawner.alive().is_empty());
        h.task.await.unwrap().unwrap();

        // no respawn after stop
        assert_eq!(h.spawner.spawned().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_kills_stubborn_workers_after_timeout() {
        let cfg = Config {
            stop_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let def = WorkerDefinition::new("web").with_count(2);
        let h = start(FakeSpawner::stubborn(), vec![def], cfg);
        settle().await;
        let pids = h.spawner.alive();

        let started = Instant::now();
        h.handle.stop().await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        let mut killed = h.spawner.signals_of(Signal::SIGKILL);
        killed.sort_unstable();
        assert_eq!(killed, pids);
        assert_eq!(h.spawner.signals_of(Signal::SIGTERM).len(), 2);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_with_empty_pool_completes_immediately() {
        let h = start(FakeSpawner::new(), Vec::new(), Config::default());
        let started = Instant::now();
        h.handle.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        h.task.await.unwrap().unwrap();
        // a second stop after shutdown returns at once
        h.handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reload_signals_by_reloadability() {
        let web = WorkerDefinition::new("web").with_count(2);
        let cron = WorkerDefinition::new("cron").with_reloadable(false);
        let (web_id, cron_id) = (web.id(), cron.id());
        let h = start(FakeSpawner::stubborn(), vec![web, cron], Config::default());
        settle().await;

        let web_pids = h.spawner.alive_for(web_id);
        let cron_pid = h.spawner.alive_for(cron_id)[0];
        h.handle.detach(web_pids[1]);
        h.handle.reload();
        settle().await;

        assert_eq!(h.spawner.signals_of(Signal::SIGUSR1), vec![web_pids[0]]);
        let mut termed = h.spawner.signals_of(Signal::SIGTERM);
        termed.sort_unstable();
        let mut expected = vec![web_pids[1], cron_pid];
        expected.sort_unstable();
        assert_eq!(termed, expected);

        // a reload exit is replaced at once
        h.spawner.exit(web_pids[0], 100);
        settle().await;
        assert_eq!(h.spawner.alive_for(web_id).len(), 2);
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_is_marked_blocked_until_heartbeat() {
        let def = WorkerDefinition::new("web");
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;
        let pid = h.spawner.alive_for(id)[0];

        sleep(Duration::from_secs(5)).await;
        h.handle.heartbeat(pid, 2048);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(blocked_events(&h.events), 0);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(blocked_events(&h.events), 1);

        // still silent: reported once
        sleep(Duration::from_secs(10)).await;
        assert_eq!(blocked_events(&h.events), 1);

        h.handle.heartbeat(pid, 2048);
        sleep(Duration::from_secs(9)).await;
        assert_eq!(blocked_events(&h.events), 2);

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn detached_worker_is_never_blocked() {
        let def = WorkerDefinition::new("web");
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def], Config::default());
        settle().await;
        h.handle.detach(h.spawner.alive_for(id)[0]);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(blocked_events(&h.events), 0);

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[test]
    fn zero_count_definition_is_rejected() {
        let mut supervisor = Supervisor::new(
            &Config::default(),
            Arc::new(FakeSpawner::new()),
            LocalBus::new(),
        );
        let err = supervisor
            .register(WorkerDefinition::new("idle").with_count(0))
            .unwrap_err();
        assert!(matches!(err, PoolError::ZeroCount { ref name } if name == "idle"));
        assert!(supervisor.register(WorkerDefinition::new("busy")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_fatal() {
        let spawner = FakeSpawner::new();
        spawner.fail_spawns();
        let h = start(spawner, vec![WorkerDefinition::new("web")], Config::default());

        let err = h.task.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
