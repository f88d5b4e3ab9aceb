//! Demo server with a worker pool, a periodic job and the control commands.
//!
//! ```text
//! cargo run --example server -- start            # foreground
//! cargo run --example server -- start --daemon   # background
//! cargo run --example server -- status
//! cargo run --example server -- reload
//! cargo run --example server -- stop
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use procvisor::logging::{self, LogConfig};
use procvisor::{
    Config, Control, MaxRequestsReloadStrategy, Message, MessageBusExt, PeriodicWorkerDefinition,
    STATUS_KEY, Server, ServerStatus, TtlReloadStrategy, WorkerContext, WorkerDefinition,
    WorkerError, is_child_process,
};

#[derive(Parser, Debug)]
#[command(name = "server", about = "procvisor demo server")]
struct Cli {
    /// Number of web worker processes.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the master.
    Start {
        /// Detach from the terminal.
        #[arg(short, long)]
        daemon: bool,
    },
    /// Stop the running master and wait for it to exit.
    Stop,
    /// Replace every worker process.
    Reload,
    /// Show server, worker and process status.
    Status,
    /// Print the raw status snapshot as JSON.
    StatusJson,
    /// List worker definitions.
    Workers,
    /// List live processes.
    Processes,
    /// List open connections published by workers.
    Connections,
    /// List periodic workers with their next run.
    Scheduler,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(LogConfig::default().with_env_overrides());
    let config = Config {
        name: "demo".into(),
        ..Config::default()
    }
    .with_env_overrides();

    match run(cli, config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: Config) -> anyhow::Result<i32> {
    // children re-run the same command line and must stay attached to the master
    if let Command::Start { daemon: true } = cli.command
        && !is_child_process()
    {
        Control::for_current_exe(&config)?.ensure_stopped()?;
        nix::unistd::daemon(true, false)?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli, config))
}

async fn dispatch(cli: Cli, config: Config) -> anyhow::Result<i32> {
    let control = || Control::for_current_exe(&config);
    match cli.command {
        Command::Start { .. } => {
            return Ok(build_server(config.clone(), cli.workers).run().await?);
        }
        Command::Stop => {
            control()?.stop().await?;
            println!("{}", "server stopped".green());
        }
        Command::Reload => {
            control()?.reload().await?;
            println!("{}", "reload requested".green());
        }
        Command::Status => print_status(&control()?.status().await?),
        Command::StatusJson => {
            println!("{}", serde_json::to_string_pretty(&control()?.status().await?)?);
        }
        Command::Workers => {
            for worker in control()?.workers().await? {
                println!(
                    "{:>4}  {:<16} count={}",
                    worker.id,
                    worker.name.bold(),
                    worker.count.unwrap_or(1)
                );
            }
        }
        Command::Processes => {
            for p in control()?.processes().await? {
                println!(
                    "{:>7}  {:<16} {:>8} KiB{}",
                    p.pid,
                    p.name,
                    p.memory / 1024,
                    flags(p.blocked, p.detached)
                );
            }
        }
        Command::Connections => {
            let connections = control()?.connections().await?;
            if connections.is_empty() {
                println!("{}", "no connections".dimmed());
            }
            for c in connections {
                println!("{c}");
            }
        }
        Command::Scheduler => {
            for job in control()?.scheduler().await? {
                let next = job
                    .next_run
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                println!(
                    "{:<16} {:<20} next={}",
                    job.name.bold(),
                    job.schedule.unwrap_or_default(),
                    next
                );
            }
        }
    }
    Ok(0)
}

fn build_server(config: Config, workers: usize) -> Server {
    let web = WorkerDefinition::new("web")
        .with_count(workers)
        .with_reload_strategy(|| MaxRequestsReloadStrategy::new(30, 20))
        .with_reload_strategy(|| TtlReloadStrategy::new(Duration::from_secs(300)))
        .on_start(|ctx: WorkerContext| async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    _ = ticks.tick() => {
                        // one simulated request per second
                        if ctx.on_request() {
                            info!(pid = ctx.pid(), "request budget spent, reloading");
                        }
                    }
                }
            }
        })
        .on_stop(|ctx: WorkerContext| async move {
            info!(pid = ctx.pid(), "web worker stopping");
            Ok(())
        });

    let report = PeriodicWorkerDefinition::new("report", "15")
        .with_jitter(Duration::from_secs(2))
        .on_start(|ctx: WorkerContext| async move {
            let status: Option<ServerStatus> = ctx
                .bus()
                .request(Message::container_get(STATUS_KEY))
                .await
                .map_err(|e| WorkerError::fail(e.to_string()))?;
            if let Some(status) = status {
                info!(processes = status.processes.len(), "status report");
            }
            Ok(())
        });

    Server::new(config).add_worker(web).add_periodic_worker(report)
}

fn flags(blocked: bool, detached: bool) -> String {
    let mut out = String::new();
    if blocked {
        out.push_str(&format!("  {}", "blocked".red()));
    }
    if detached {
        out.push_str(&format!("  {}", "detached".yellow()));
    }
    out
}

fn print_status(status: &ServerStatus) {
    println!(
        "{} {} (pid {}, {:?}, up since {})",
        "server".bold(),
        status.name.green(),
        status.pid,
        status.status,
        status.started_at.to_rfc3339()
    );
    for worker in status.workers() {
        let alive = status.processes_of(worker.id).count();
        println!(
            "  {:<16} {}/{} processes",
            worker.name,
            alive,
            worker.count.unwrap_or(1)
        );
    }
    for job in status.periodic() {
        println!(
            "  {:<16} periodic, last run {}",
            job.name,
            job.last_run
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
        );
    }
}
