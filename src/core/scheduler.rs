//! # Scheduler: launches periodic jobs from their triggers.
//!
//! The [`Scheduler`] owns the periodic [`WorkerPool`] and one [`Trigger`] per
//! definition. Each scheduled run is a one-shot timer task that posts a fire
//! command back to the scheduler loop.
//!
//! ## Rules
//! - A definition never has two live processes: a run that finds the previous
//!   one still alive is skipped and the next run is computed from now
//! - A definition whose schedule does not parse is logged and never runs;
//!   the others are unaffected
//! - Stop sends SIGTERM and waits for the pool to drain, without a kill deadline

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::pool::{PoolStatus, WorkerPool};
use crate::core::spawner::{ExitNotice, SpawnRequest, Spawner};
use crate::error::{PoolError, RuntimeError};
use crate::messages::{LocalBus, Message};
use crate::triggers::{self, Clock, Trigger};
use crate::workers::{Definition, PeriodicWorkerDefinition, ProcessKind, WorkerId};

enum Command {
    Stop(oneshot::Sender<()>),
    Fire {
        worker_id: WorkerId,
        planned: DateTime<Utc>,
    },
}

/// Cloneable handle for stopping a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Stops scheduling and resolves once no periodic process is alive.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Stop(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

/// Actor driving the periodic pool.
pub struct Scheduler {
    pool: WorkerPool<PeriodicWorkerDefinition>,
    triggers: HashMap<WorkerId, Box<dyn Trigger>>,
    spawner: Arc<dyn Spawner>,
    bus: Arc<LocalBus>,
    clock: Clock,
    status: PoolStatus,
    stop_waiters: Vec<oneshot::Sender<()>>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    exits_tx: mpsc::UnboundedSender<ExitNotice>,
    exits_rx: mpsc::UnboundedReceiver<ExitNotice>,
    timers: CancellationToken,
}

impl Scheduler {
    pub fn new(spawner: Arc<dyn Spawner>, bus: Arc<LocalBus>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            pool: WorkerPool::new(),
            triggers: HashMap::new(),
            spawner,
            bus,
            clock: triggers::system_clock(),
            status: PoolStatus::Starting,
            stop_waiters: Vec::new(),
            commands_tx,
            commands_rx,
            exits_tx,
            exits_rx,
            timers: CancellationToken::new(),
        }
    }

    /// Replaces the wall clock used to evaluate triggers.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn register(&mut self, definition: PeriodicWorkerDefinition) -> Result<(), PoolError> {
        self.pool.register(definition).map(|_| ())
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Arms every valid trigger and runs until stopped.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let mut fatal = None;
        self.start();

        while self.status != PoolStatus::Shutdown {
            let step = tokio::select! {
                Some(cmd) = self.commands_rx.recv() => self.on_command(cmd),
                Some(exit) = self.exits_rx.recv() => {
                    self.on_exit(exit);
                    Ok(())
                }
            };
            if let Err(e) = step
                && fatal.is_none()
            {
                error!(error = %e, label = e.as_label(), "scheduler failed, stopping periodic workers");
                self.begin_stop();
                fatal = Some(e);
            }
        }

        self.timers.cancel();
        debug!("scheduler finished");
        fatal.map_or(Ok(()), Err)
    }

    fn start(&mut self) {
        self.status = PoolStatus::Starting;
        let mut armed = Vec::new();
        for definition in self.pool.definitions() {
            match triggers::from_schedule(definition.schedule(), definition.jitter()) {
                Ok(trigger) => {
                    self.triggers.insert(definition.id(), trigger);
                    armed.push(definition.id());
                }
                Err(e) => warn!(
                    worker = %definition.name(),
                    schedule = %definition.schedule(),
                    error = %e,
                    "invalid schedule, periodic worker will not run"
                ),
            }
        }
        self.status = PoolStatus::Running;

        let now = (self.clock)();
        for id in armed {
            self.schedule_worker(id, now);
        }
    }

    /// Arms the next run of `id`, computed from the later of `reference` and now.
    fn schedule_worker(&mut self, id: WorkerId, reference: DateTime<Utc>) {
        let Some(trigger) = self.triggers.get(&id) else {
            return;
        };
        let now = (self.clock)();
        let Some(next_run) = trigger.next_run(reference.max(now)) else {
            debug!(worker_id = %id, "trigger exhausted, no further runs");
            return;
        };

        let delay = (next_run - now).to_std().unwrap_or_default();
        let tx = self.commands_tx.clone();
        let token = self.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = tx.send(Command::Fire { worker_id: id, planned: next_run });
                }
            }
        });

        self.bus.dispatch_now(&Message::PeriodicScheduled {
            worker_id: id,
            next_run,
        });
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
                Ok(())
            }
            Command::Fire { worker_id, planned } => {
                if self.status != PoolStatus::Running {
                    return Ok(());
                }
                self.start_worker(worker_id, planned)
            }
        }
    }

    fn start_worker(&mut self, id: WorkerId, planned: DateTime<Utc>) -> Result<(), RuntimeError> {
        let definition = self
            .pool
            .definition(id)
            .cloned()
            .ok_or(PoolError::DefinitionNotFound { id })?;

        if let Some(pid) = self.pool.alive_pids(id).first() {
            info!(
                worker = %definition.name(),
                pid,
                "periodic worker still running, rescheduled"
            );
            let now = (self.clock)();
            self.schedule_worker(id, now);
            return Ok(());
        }

        let request = SpawnRequest::new(ProcessKind::Periodic, definition.as_ref());
        let pid = self.spawner.spawn(&request, self.exits_tx.clone())?;
        let record = self.pool.add_child(id, pid)?;
        let spawned = Message::ProcessSpawned {
            worker_id: id,
            name: definition.name().to_string(),
            kind: ProcessKind::Periodic,
            pid,
            user: definition.credentials().user.clone(),
            started_at: record.started_at,
        };
        info!(worker = %definition.name(), pid, "periodic worker started");
        self.bus.dispatch_now(&Message::composite([
            spawned,
            Message::PeriodicStarted { worker_id: id, pid },
        ]));

        self.schedule_worker(id, planned);
        Ok(())
    }

    fn on_exit(&mut self, exit: ExitNotice) {
        let Some(record) = self.pool.delete_child(exit.pid) else {
            debug!(pid = exit.pid, "exit of untracked pid ignored");
            return;
        };
        let name = self
            .pool
            .definition(record.worker_id)
            .map(|d| d.name().to_string())
            .unwrap_or_default();
        if exit.code == 0 {
            debug!(worker = %name, pid = exit.pid, "periodic worker finished");
        } else {
            warn!(worker = %name, pid = exit.pid, exit_code = exit.code, "periodic worker failed");
        }
        self.bus.dispatch_now(&Message::ProcessExited {
            worker_id: record.worker_id,
            kind: ProcessKind::Periodic,
            pid: exit.pid,
            exit_code: exit.code,
        });

        if self.status == PoolStatus::Stopping && self.pool.is_empty() {
            self.complete_stop();
        }
    }

    fn begin_stop(&mut self) {
        if matches!(self.status, PoolStatus::Stopping | PoolStatus::Shutdown) {
            return;
        }
        self.status = PoolStatus::Stopping;
        self.timers.cancel();

        let pids = self.pool.all_pids();
        info!(processes = pids.len(), "stopping periodic workers");
        for pid in pids {
            if let Err(e) = self.spawner.signal(pid, Signal::SIGTERM) {
                debug!(pid, error = %e, "signal not delivered");
            }
        }
        if self.pool.is_empty() {
            self.complete_stop();
        }
    }

    fn complete_stop(&mut self) {
        self.status = PoolStatus::Shutdown;
        for done in self.stop_waiters.drain(..) {
            let _ = done.send(());
        }
        info!("periodic workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeSpawner;
    use crate::messages::{MessageHandler, MessageKind};
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    struct Harness {
        spawner: FakeSpawner,
        handle: SchedulerHandle,
        task: JoinHandle<Result<(), RuntimeError>>,
        scheduled: Arc<Mutex<Vec<(WorkerId, DateTime<Utc>)>>>,
    }

    /// Wall clock following tokio's paused clock.
    fn paused_clock() -> Clock {
        let origin = Instant::now();
        let epoch = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        Arc::new(move || {
            epoch + chrono::Duration::from_std(origin.elapsed()).unwrap_or_default()
        })
    }

    fn start(spawner: FakeSpawner, definitions: Vec<PeriodicWorkerDefinition>) -> Harness {
        let bus = LocalBus::new();
        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let sink = scheduled.clone();
        bus.subscribe(
            MessageKind::PeriodicScheduled,
            Arc::new(move |m| {
                if let Message::PeriodicScheduled {
                    worker_id,
                    next_run,
                } = m
                {
                    sink.lock().push((*worker_id, *next_run));
                }
                serde_json::Value::Null
            }),
        );

        let mut scheduler =
            Scheduler::new(Arc::new(spawner.clone()), bus).with_clock(paused_clock());
        for def in definitions {
            scheduler.register(def).unwrap();
        }
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());
        Harness {
            spawner,
            handle,
            task,
            scheduled,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interval_schedule_runs_repeatedly() {
        let def = PeriodicWorkerDefinition::new("tick", "5");
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def]);

        for _ in 0..20 {
            sleep(Duration::from_secs(1)).await;
            // each run finishes within its second
            for pid in h.spawner.alive_for(id) {
                h.spawner.exit(pid, 0);
            }
        }

        let spawns = h.spawner.spawned().len();
        assert!((3..=4).contains(&spawns), "spawned {spawns} times");

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_run_is_skipped_and_rescheduled() {
        let def = PeriodicWorkerDefinition::new("slow", "1");
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def]);

        sleep(Duration::from_millis(1500)).await;
        let first = h.spawner.alive_for(id);
        assert_eq!(first.len(), 1);

        // the job outlives several periods
        sleep(Duration::from_secs(3)).await;
        assert_eq!(h.spawner.alive_for(id), first);
        assert_eq!(h.spawner.spawned().len(), 1);

        h.spawner.exit(first[0], 0);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.spawner.alive_for(id).len(), 1);
        assert_eq!(h.spawner.spawned().len(), 2);

        // every skipped tick was rescheduled one period after the check
        let runs: Vec<DateTime<Utc>> = h.scheduled.lock().iter().map(|(_, at)| *at).collect();
        assert!(runs.windows(2).all(|w| w[1] > w[0]));

        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_schedule_is_skipped() {
        let bad = PeriodicWorkerDefinition::new("bad", "every now and then");
        let good = PeriodicWorkerDefinition::new("good", "2");
        let (bad_id, good_id) = (bad.id(), good.id());
        let h = start(FakeSpawner::new(), vec![bad, good]);

        sleep(Duration::from_millis(2500)).await;
        assert!(h.spawner.alive_for(bad_id).is_empty());
        assert_eq!(h.spawner.alive_for(good_id).len(), 1);
        assert!(h.scheduled.lock().iter().all(|(id, _)| *id == good_id));

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_datetime_runs_once() {
        let def = PeriodicWorkerDefinition::new("once", "2025-03-01T10:00:03Z");
        let id = def.id();
        let h = start(FakeSpawner::new(), vec![def]);

        sleep(Duration::from_secs(4)).await;
        let pids = h.spawner.alive_for(id);
        assert_eq!(pids.len(), 1);
        h.spawner.exit(pids[0], 0);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.spawner.spawned().len(), 1);
        assert_eq!(h.scheduled.lock().len(), 1);

        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_running_job_without_killing() {
        let def = PeriodicWorkerDefinition::new("job", "1");
        let id = def.id();
        let h = start(FakeSpawner::stubborn(), vec![def]);

        sleep(Duration::from_millis(1500)).await;
        let pid = h.spawner.alive_for(id)[0];

        let handle = h.handle.clone();
        let stopping = tokio::spawn(async move { handle.stop().await });
        sleep(Duration::from_secs(120)).await;
        assert!(!stopping.is_finished());
        assert_eq!(h.spawner.signals_of(Signal::SIGTERM), vec![pid]);
        assert!(h.spawner.signals_of(Signal::SIGKILL).is_empty());

        h.spawner.exit(pid, 0);
        stopping.await.unwrap();
        h.task.await.unwrap().unwrap();
        assert_eq!(h.spawner.spawned().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_with_nothing_running_is_immediate() {
        let h = start(FakeSpawner::new(), vec![PeriodicWorkerDefinition::new("x", "60")]);
        h.handle.stop().await;
        h.task.await.unwrap().unwrap();
        assert!(h.spawner.spawned().is_empty());
    }
}
