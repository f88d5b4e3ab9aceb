//! # Child bootstrap: what a re-executed process runs instead of the master.
//!
//! The master starts children by re-executing its own binary with
//! [`CHILD_ENV`] naming the definition and [`SOCKET_ENV`] pointing at the bus
//! socket. The child rebuilds the same [`Server`](crate::Server), looks the
//! definition up by id and runs it here.
//!
//! ## Worker lifecycle
//! ```text
//! on_start(ctx) ──► Ok  ──► wait for stop/reload
//!               └─► Err ──► report_error, exit code 1
//! stop/reload ──► on_reload (code 100, when set) or on_stop ──► exit code
//! ```
//! Heartbeats are pushed to the master every heartbeat period until the
//! worker stops or detaches. Panics in callbacks count as
//! [`WorkerError::Fatal`].
//!
//! A periodic child runs `on_start` once and exits.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::memory::current_memory;
use crate::core::signals::{ChildSignal, ChildSignals};
use crate::error::{RuntimeError, WorkerError};
use crate::messages::{Message, MessageBus, SocketClient};
use crate::policies::RELOAD_EXIT_CODE;
use crate::reload::ReloadTrigger;
use crate::workers::{
    Definition, ExitLatch, PeriodicWorkerDefinition, ProcessKind, WorkerCallback, WorkerContext,
    WorkerDefinition, WorkerId,
};

/// Environment variable carrying the child role, e.g. `worker:3`.
pub const CHILD_ENV: &str = "PROCVISOR_CHILD";
/// Environment variable carrying the master's bus socket path.
pub const SOCKET_ENV: &str = "PROCVISOR_SOCKET";

/// Exit code of a worker whose callback failed.
const FAILURE_EXIT_CODE: i32 = 1;

/// Which definition a child process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRole {
    pub kind: ProcessKind,
    pub worker_id: WorkerId,
}

impl fmt::Display for ChildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.worker_id)
    }
}

impl FromStr for ChildRole {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || RuntimeError::UnknownChild { role: s.to_string() };
        let (kind, id) = s.split_once(':').ok_or_else(unknown)?;
        let kind = match kind {
            "worker" => ProcessKind::Worker,
            "periodic" => ProcessKind::Periodic,
            _ => return Err(unknown()),
        };
        let id = id.parse::<u32>().map_err(|_| unknown())?;
        Ok(Self {
            kind,
            worker_id: WorkerId(id),
        })
    }
}

/// Bootstrap environment of a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEnv {
    pub role: ChildRole,
    pub socket: PathBuf,
}

impl ChildEnv {
    /// Reads the bootstrap variables; `None` in the master.
    pub fn from_env() -> Result<Option<Self>, RuntimeError> {
        let Ok(raw) = std::env::var(CHILD_ENV) else {
            return Ok(None);
        };
        let role = raw.parse()?;
        let socket = std::env::var_os(SOCKET_ENV)
            .map(PathBuf::from)
            .ok_or(RuntimeError::UnknownChild { role: raw })?;
        Ok(Some(Self { role, socket }))
    }
}

/// True when the current process was started by a master as a child.
pub fn is_child_process() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Runs the definition named by `env` and returns the process exit code.
pub(crate) async fn run_child(
    env: ChildEnv,
    config: &Config,
    workers: &[WorkerDefinition],
    periodic: &[PeriodicWorkerDefinition],
) -> Result<i32, RuntimeError> {
    let unknown = || RuntimeError::UnknownChild {
        role: env.role.to_string(),
    };
    let bus: Arc<dyn MessageBus> = Arc::new(
        SocketClient::new(&env.socket)
            .with_backoff(config.connect_backoff, config.connect_attempts_clamped()),
    );
    let mut signals = ChildSignals::new()?;
    let signal = async move { signals.recv().await };

    let code = match env.role.kind {
        ProcessKind::Worker => {
            let definition = workers
                .iter()
                .find(|d| d.id() == env.role.worker_id)
                .ok_or_else(unknown)?;
            run_worker(definition, bus, config.heartbeat_interval(), signal).await
        }
        ProcessKind::Periodic => {
            let definition = periodic
                .iter()
                .find(|d| d.id() == env.role.worker_id)
                .ok_or_else(unknown)?;
            run_periodic(definition, bus, signal).await
        }
    };
    Ok(code)
}

/// Runs a long-lived worker until it is stopped, reloaded or fails.
pub(crate) async fn run_worker<S>(
    definition: &WorkerDefinition,
    bus: Arc<dyn MessageBus>,
    heartbeat: Option<Duration>,
    signal: S,
) -> i32
where
    S: Future<Output = ChildSignal> + Send + 'static,
{
    let latch = ExitLatch::new();
    let strategies = definition.build_reload_strategies();
    let mut timers = Vec::new();
    let reload = (!strategies.is_empty()).then(|| {
        let on_reload = latch.clone();
        let mut trigger = ReloadTrigger::new(
            strategies,
            Arc::new(move || {
                on_reload.stop(RELOAD_EXIT_CODE);
            }),
        );
        timers = trigger.spawn_timers(latch.token().clone());
        trigger
    });
    let ctx = WorkerContext::new(
        definition.id(),
        definition.name(),
        ProcessKind::Worker,
        bus,
        latch.clone(),
        reload,
    );

    let mut tasks = vec![listen(signal, latch.clone())];
    if let Some(period) = heartbeat {
        tasks.push(tokio::spawn(heartbeat_loop(ctx.clone(), period)));
    }
    info!(worker = %ctx.name(), pid = ctx.pid(), "worker process ready");

    if let Err(e) = invoke(definition.start_callback(), &ctx).await
        && !(matches!(e, WorkerError::Canceled) && ctx.is_stopping())
    {
        ctx.report_error(&e);
        latch.stop(FAILURE_EXIT_CODE);
    }
    ctx.cancelled().await;

    let code = latch.code();
    let finish = match definition.reload_callback() {
        Some(on_reload) if code == RELOAD_EXIT_CODE => Some(on_reload),
        _ => definition.stop_callback(),
    };
    if let Err(e) = invoke(finish, &ctx).await {
        ctx.report_error(&e);
    }

    for task in tasks.into_iter().chain(timers) {
        task.abort();
    }
    debug!(worker = %ctx.name(), pid = ctx.pid(), code, "worker process finished");
    code
}

/// Runs one periodic job to completion.
pub(crate) async fn run_periodic<S>(
    definition: &PeriodicWorkerDefinition,
    bus: Arc<dyn MessageBus>,
    signal: S,
) -> i32
where
    S: Future<Output = ChildSignal> + Send + 'static,
{
    let latch = ExitLatch::new();
    let ctx = WorkerContext::new(
        definition.id(),
        definition.name(),
        ProcessKind::Periodic,
        bus,
        latch.clone(),
        None,
    );
    let listener = listen(signal, latch.clone());

    let code = match invoke(definition.start_callback(), &ctx).await {
        Ok(()) | Err(WorkerError::Canceled) if ctx.is_stopping() => latch.code(),
        Ok(()) => 0,
        Err(e) => {
            ctx.report_error(&e);
            FAILURE_EXIT_CODE
        }
    };
    listener.abort();
    code
}

fn listen<S>(signal: S, latch: Arc<ExitLatch>) -> JoinHandle<()>
where
    S: Future<Output = ChildSignal> + Send + 'static,
{
    tokio::spawn(async move {
        let code = match signal.await {
            ChildSignal::Stop => 0,
            ChildSignal::Reload => RELOAD_EXIT_CODE,
        };
        latch.stop(code);
    })
}

async fn invoke(callback: Option<&WorkerCallback>, ctx: &WorkerContext) -> Result<(), WorkerError> {
    let Some(callback) = callback else {
        return Ok(());
    };
    match AssertUnwindSafe(callback.call(ctx.clone()))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(WorkerError::fatal(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

async fn heartbeat_loop(ctx: WorkerContext, period: Duration) {
    let mut ticks = interval(period);
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = ticks.tick() => {
                if ctx.is_detached() {
                    break;
                }
                let beat = Message::Heartbeat {
                    pid: ctx.pid(),
                    memory: current_memory(),
                };
                if let Err(e) = ctx.bus().dispatch(beat).await {
                    debug!(pid = ctx.pid(), error = %e, "heartbeat not delivered");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{LocalBus, MessageHandler, MessageKind};
    use crate::reload::EachRequestReloadStrategy;
    use parking_lot::Mutex;
    use std::future::pending;
    use tokio::time::sleep;

    fn recorder(bus: &LocalBus, kind: MessageKind) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            kind,
            Arc::new(move |m| {
                sink.lock().push(m.clone());
                serde_json::Value::Null
            }),
        );
        seen
    }

    #[test]
    fn role_round_trips_through_env_value() {
        let role = ChildRole {
            kind: ProcessKind::Periodic,
            worker_id: WorkerId(7),
        };
        assert_eq!(role.to_string(), "periodic:7");
        assert_eq!("periodic:7".parse::<ChildRole>().unwrap(), role);
    }

    #[test]
    fn malformed_roles_are_rejected() {
        for raw in ["", "worker", "worker:x", "daemon:1", "worker:-1"] {
            let err = raw.parse::<ChildRole>().unwrap_err();
            assert_eq!(err.as_label(), "runtime_unknown_child", "{raw}");
        }
    }

    #[tokio::test]
    async fn stop_signal_runs_on_stop_and_exits_clean() {
        let stopped = Arc::new(Mutex::new(false));
        let flag = stopped.clone();
        let def = WorkerDefinition::new("web")
            .on_start(|ctx: WorkerContext| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .on_stop(move |_| {
                let flag = flag.clone();
                async move {
                    *flag.lock() = true;
                    Ok(())
                }
            });

        let code = run_worker(&def, LocalBus::new(), None, async { ChildSignal::Stop }).await;
        assert_eq!(code, 0);
        assert!(*stopped.lock());
    }

    #[tokio::test]
    async fn reload_signal_prefers_on_reload() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (on_stop, on_reload) = (calls.clone(), calls.clone());
        let def = WorkerDefinition::new("web")
            .on_stop(move |_| {
                on_stop.lock().push("stop");
                async { Ok(()) }
            })
            .on_reload(move |_| {
                on_reload.lock().push("reload");
                async { Ok(()) }
            });

        let code = run_worker(&def, LocalBus::new(), None, async { ChildSignal::Reload }).await;
        assert_eq!(code, RELOAD_EXIT_CODE);
        assert_eq!(*calls.lock(), vec!["reload"]);
    }

    #[tokio::test]
    async fn start_error_exits_with_failure() {
        let def = WorkerDefinition::new("web")
            .on_start(|_| async { Err(WorkerError::fail("bind failed")) });
        let code = run_worker(&def, LocalBus::new(), None, pending()).await;
        assert_eq!(code, FAILURE_EXIT_CODE);
    }

    fn explode() -> Result<(), WorkerError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_in_callback_is_contained() {
        let def = WorkerDefinition::new("web").on_start(|_| async { explode() });
        let code = run_worker(&def, LocalBus::new(), None, pending()).await;
        assert_eq!(code, FAILURE_EXIT_CODE);
    }

    #[tokio::test]
    async fn request_strategy_reloads_worker() {
        let def = WorkerDefinition::new("web")
            .with_reload_strategy(EachRequestReloadStrategy::new)
            .on_start(|ctx: WorkerContext| async move {
                assert!(ctx.on_request());
                Ok(())
            });
        let code = run_worker(&def, LocalBus::new(), None, pending()).await;
        assert_eq!(code, RELOAD_EXIT_CODE);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_stop_after_detach() {
        let bus = LocalBus::new();
        let beats = recorder(&bus, MessageKind::Heartbeat);
        let detached = recorder(&bus, MessageKind::ProcessDetached);
        let def = WorkerDefinition::new("web").on_start(|ctx: WorkerContext| async move {
            sleep(Duration::from_secs(5)).await;
            ctx.detach().await.map_err(|e| WorkerError::fail(e.to_string()))?;
            sleep(Duration::from_secs(10)).await;
            ctx.stop(0);
            Ok(())
        });

        let code = run_worker(&def, bus, Some(Duration::from_secs(2)), pending()).await;
        assert_eq!(code, 0);
        // ticks at 0s, 2s and 4s
        assert_eq!(beats.lock().len(), 3);
        assert_eq!(detached.lock().len(), 1);
        assert!(matches!(
            beats.lock()[0],
            Message::Heartbeat { pid, .. } if pid == std::process::id()
        ));
    }

    #[tokio::test]
    async fn periodic_job_exits_after_start() {
        let bus = LocalBus::new();
        let def = PeriodicWorkerDefinition::new("report", "60").on_start(|ctx: WorkerContext| async move {
            ctx.bus()
                .dispatch(Message::container_set("last_report", serde_json::json!(1)))
                .await
                .map_err(|e| WorkerError::fail(e.to_string()))?;
            Ok(())
        });
        let code = run_periodic(&def, bus, pending()).await;
        assert_eq!(code, 0);

        let failing = PeriodicWorkerDefinition::new("report", "60")
            .on_start(|_| async { Err(WorkerError::fatal("db down")) });
        assert_eq!(run_periodic(&failing, LocalBus::new(), pending()).await, FAILURE_EXIT_CODE);
    }
}
