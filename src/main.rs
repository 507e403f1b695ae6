//! procvisor binary.
//!
//! - `procvisor [serve]` runs the HTTP gateway, the collectors and the worker pool
//!   on a single-threaded scheduler.
//! - `procvisor worker` (hidden) is the child process started for each process
//!   worker; it serves JSON lines on stdin/stdout and logs to stderr.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use procvisor::{
    Config, Isolation, SquareSum, Supervisor, router, serve_stdio, wait_for_shutdown_signal,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "procvisor", version)]
#[command(about = "Task gateway fanning CPU-bound work out to supervised worker processes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gateway (default)
    Serve(ServeArgs),
    /// Worker process entry point; started by the gateway
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PROCVISOR_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Number of workers (0 = one per CPU core)
    #[arg(long, env = "PROCVISOR_WORKERS", default_value_t = 0)]
    workers: usize,

    /// Emit progress every N steps
    #[arg(long, env = "PROCVISOR_PROGRESS_INTERVAL", default_value_t = 10)]
    progress_interval: u64,

    /// Progress collector backoff when idle (e.g. 100ms)
    #[arg(
        long,
        env = "PROCVISOR_PROGRESS_POLL",
        default_value = "100ms",
        value_parser = humantime::parse_duration
    )]
    progress_poll: Duration,

    /// Result collector backoff when idle (e.g. 500ms)
    #[arg(
        long,
        env = "PROCVISOR_RESULT_POLL",
        default_value = "500ms",
        value_parser = humantime::parse_duration
    )]
    result_poll: Duration,

    /// Task queue capacity (0 = unbounded)
    #[arg(long, env = "PROCVISOR_QUEUE_CAPACITY", default_value_t = 0)]
    queue_capacity: usize,

    /// Inner sum bound of each computation step
    #[arg(long, env = "PROCVISOR_SPAN", default_value_t = 10_000)]
    span: u64,

    /// Run workers as threads inside this process instead of child processes
    #[arg(long, env = "PROCVISOR_IN_PROCESS", default_value_t = false)]
    in_process: bool,

    /// Executable started for each worker process (defaults to this binary)
    #[arg(long, env = "PROCVISOR_WORKER_PROGRAM")]
    worker_program: Option<PathBuf>,

    /// Upper bound for waiting on workers at shutdown (e.g. 30s)
    #[arg(long, env = "PROCVISOR_GRACE", value_parser = humantime::parse_duration)]
    grace: Option<Duration>,
}

impl ServeArgs {
    fn config(&self) -> Config {
        Config {
            workers: self.workers,
            progress_interval: self.progress_interval,
            progress_poll: self.progress_poll,
            result_poll: self.result_poll,
            queue_capacity: self.queue_capacity,
            span: self.span,
            isolation: if self.in_process {
                Isolation::Thread
            } else {
                Isolation::Process
            },
            worker_program: self.worker_program.clone(),
            grace: self.grace,
            ..Config::default()
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
struct WorkerArgs {
    /// Worker index (for logs)
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Emit progress every N steps
    #[arg(long, default_value_t = 10)]
    progress_interval: u64,

    /// Inner sum bound of each computation step
    #[arg(long, default_value_t = 10_000)]
    span: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Worker(args)) => {
            init_tracing(true);
            run_worker(&args);
            Ok(())
        }
        Some(Command::Serve(args)) => serve(args),
        None => serve(cli.serve),
    }
}

fn init_tracing(stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if stderr {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn run_worker(args: &WorkerArgs) {
    let workload = SquareSum { span: args.span };
    let report = serve_stdio(args.index, &workload, args.progress_interval);
    tracing::debug!(
        worker = args.index,
        exit = ?report.exit,
        units = report.units,
        "worker exiting"
    );
}

fn serve(args: ServeArgs) -> anyhow::Result<()> {
    init_tracing(false);
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the runtime")?
        .block_on(run_server(args))
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let cfg = args.config();
    let supervisor = Supervisor::builder(cfg)
        .build()
        .context("failed to start the worker pool")?;

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, workers = supervisor.worker_count(), "listening");

    let served = axum::serve(listener, router(supervisor.gateway()))
        .with_graceful_shutdown(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                error!(error = %e, "failed to listen for shutdown signals");
                std::future::pending::<()>().await;
            }
        })
        .await;

    let stopped = supervisor.shutdown().await;
    served.context("http server failed")?;
    stopped.context("shutdown did not complete cleanly")?;
    info!("procvisor stopped");
    Ok(())
}
