//! # Supervisor: owns the worker pool, the collectors and the shutdown sequence.
//!
//! The [`Supervisor`] is the explicit context of the service. It owns the three
//! channels, the [`TaskRegistry`], the workers and both collectors, and hands
//! out the [`Gateway`] used by request handlers.
//!
//! ## Startup
//! ```text
//! SupervisorBuilder::build()
//!   ├─► Channels::new(queue_capacity)
//!   ├─► worker_count() × worker
//!   │     ├─ Process: ProcessWorker::start (child spawned now) ─► JoinSet::spawn(driver)
//!   │     └─ Thread:  JoinSet::spawn_blocking(ThreadWorker::run)
//!   ├─► spawn_progress_collector(progress_poll)
//!   ├─► spawn_result_collector(result_poll)
//!   └─► Gateway (shares the TaskQueue, the registry and the shutdown token)
//! ```
//!
//! ## Shutdown path
//! ```text
//! shutdown()
//!   ├─► token.cancel()                 → gateway rejects new submissions
//!   ├─► gateway admission fence        → no submission is half-way through
//!   ├─► await collectors               → they stop at their next suspension point
//!   ├─► drain queued Run units         → tasks failed with shutdown_before_dispatch
//!   ├─► push one Shutdown per worker
//!   ├─► join workers (optionally bounded by cfg.grace)
//!   │     └─ timeout → kill token → RuntimeError::GraceExceeded { stuck }
//!   └─► close all channels
//! ```
//!
//! ## Rules
//! - `shutdown()` is idempotent: concurrent callers wait for the first one and
//!   later calls return `Ok(())` immediately.
//! - Without `cfg.grace`, shutdown waits for every in-flight computation.
//! - After `shutdown()` returns, no worker is alive and no event is delivered.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, Isolation};
use crate::core::builder::SupervisorBuilder;
use crate::core::collector::{spawn_progress_collector, spawn_result_collector};
use crate::error::{ComputeError, RuntimeError};
use crate::events::{Channels, Command, ResultEvent};
use crate::gateway::Gateway;
use crate::registry::TaskRegistry;
use crate::worker::{ProcessWorker, SquareSum, ThreadWorker, WorkerCommand, WorkerReport, Workload};

/// How long killed workers get to be reaped after the grace period expired.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Live parts, taken out on shutdown.
struct Running {
    workers: JoinSet<(usize, WorkerReport)>,
    pending: BTreeSet<usize>,
    collectors: Vec<JoinHandle<u64>>,
    kill: CancellationToken,
}

/// Coordinates workers, collectors and graceful shutdown.
pub struct Supervisor {
    cfg: Config,
    workers: usize,
    registry: Arc<TaskRegistry>,
    channels: Channels,
    token: CancellationToken,
    gateway: Arc<Gateway>,
    state: Mutex<Option<Running>>,
}

impl Supervisor {
    /// Returns a builder for `cfg`.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    /// Spawns the workers and both collectors.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn startup(
        cfg: Config,
        workload: Option<Arc<dyn Workload>>,
    ) -> Result<Arc<Self>, RuntimeError> {
        let count = cfg.worker_count();
        let channels = Channels::new(cfg.queue_capacity);
        let registry = Arc::new(TaskRegistry::new());
        let token = CancellationToken::new();
        let kill = CancellationToken::new();

        let mut workers = JoinSet::new();
        if let Err(e) = spawn_workers(&cfg, count, workload, &channels, &kill, &mut workers) {
            kill.cancel();
            channels.close_all();
            workers.abort_all();
            return Err(e);
        }

        let collectors = vec![
            spawn_progress_collector(
                channels.progress.clone(),
                Arc::clone(&registry),
                cfg.progress_poll,
                token.clone(),
            ),
            spawn_result_collector(
                channels.results.clone(),
                Arc::clone(&registry),
                cfg.result_poll,
                token.clone(),
            ),
        ];

        let gateway = Arc::new(Gateway::new(
            Arc::clone(&registry),
            channels.tasks.clone(),
            token.clone(),
        ));

        info!(
            workers = count,
            isolation = ?cfg.isolation,
            queue = ?cfg.queue_bound(),
            "supervisor started"
        );
        Ok(Arc::new(Self {
            cfg,
            workers: count,
            registry,
            channels,
            token,
            gateway,
            state: Mutex::new(Some(Running {
                workers,
                pending: (0..count).collect(),
                collectors,
                kill,
            })),
        }))
    }

    /// Request-facing API.
    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    /// Task state store shared with the gateway.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// The TaskQueue, ProgressChannel and ResultChannel.
    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Configuration the supervisor was started with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// True once [`shutdown`](Self::shutdown) has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the service; see the module docs for the sequence.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let Some(mut running) = state.take() else {
            return Ok(());
        };

        info!("shutdown requested");
        self.token.cancel();
        self.gateway.fence().await;

        for collector in running.collectors.drain(..) {
            if let Err(e) = collector.await {
                warn!(error = %e, "collector task failed");
            }
        }

        let drained = self.drain_backlog().await;
        if drained > 0 {
            info!(drained, "queued tasks failed before dispatch");
        }

        for _ in 0..self.workers {
            if self.channels.tasks.push_wait(Command::Shutdown).await.is_err() {
                break;
            }
        }

        let result = self.join_workers(&mut running).await;
        self.channels.close_all();
        match &result {
            Ok(()) => info!("all workers stopped"),
            Err(e) => warn!(
                error = %e,
                label = e.as_label(),
                "shutdown finished with stuck workers"
            ),
        }
        result
    }

    /// Fails every WorkUnit still waiting in the TaskQueue.
    async fn drain_backlog(&self) -> usize {
        let mut drained = 0;
        while let Ok(Some(cmd)) = self.channels.tasks.try_pop() {
            if let Command::Run(unit) = cmd {
                let ev = ResultEvent::failed(unit.task_id, &ComputeError::NotDispatched);
                self.registry.apply_result(&ev).await;
                drained += 1;
            }
        }
        drained
    }

    async fn join_workers(&self, running: &mut Running) -> Result<(), RuntimeError> {
        let Some(grace) = self.cfg.grace else {
            join_all(&mut running.workers, &mut running.pending).await;
            return Ok(());
        };

        if tokio::time::timeout(grace, join_all(&mut running.workers, &mut running.pending))
            .await
            .is_ok()
        {
            return Ok(());
        }

        let stuck: Vec<usize> = running.pending.iter().copied().collect();
        warn!(?grace, ?stuck, "shutdown grace exceeded; killing workers");
        running.kill.cancel();
        self.channels.close_all();
        if tokio::time::timeout(REAP_TIMEOUT, join_all(&mut running.workers, &mut running.pending))
            .await
            .is_err()
        {
            running.workers.detach_all();
        }
        Err(RuntimeError::GraceExceeded { grace, stuck })
    }
}

fn spawn_workers(
    cfg: &Config,
    count: usize,
    workload: Option<Arc<dyn Workload>>,
    channels: &Channels,
    kill: &CancellationToken,
    workers: &mut JoinSet<(usize, WorkerReport)>,
) -> Result<(), RuntimeError> {
    match cfg.isolation {
        Isolation::Process => {
            let command = WorkerCommand::from_config(cfg)
                .map_err(|source| RuntimeError::Spawn { worker: 0, source })?;
            for index in 0..count {
                let worker = ProcessWorker::start(
                    index,
                    command.clone(),
                    channels.clone(),
                    cfg.respawn,
                    kill.clone(),
                )?;
                workers.spawn(async move { (index, worker.run().await) });
            }
        }
        Isolation::Thread => {
            let workload: Arc<dyn Workload> =
                workload.unwrap_or_else(|| Arc::new(SquareSum { span: cfg.span }));
            for index in 0..count {
                let worker = ThreadWorker {
                    index,
                    workload: Arc::clone(&workload),
                    interval: cfg.interval(),
                    channels: channels.clone(),
                };
                workers.spawn_blocking(move || (index, worker.run()));
            }
        }
    }
    Ok(())
}

async fn join_all(workers: &mut JoinSet<(usize, WorkerReport)>, pending: &mut BTreeSet<usize>) {
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, report)) => {
                pending.remove(&index);
                debug!(
                    worker = index,
                    exit = ?report.exit,
                    units = report.units,
                    failed = report.failed,
                    "worker joined"
                );
            }
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TaskId, WorkUnit};
    use crate::registry::TaskStatus;
    use crate::worker::StepError;

    struct Sleepy(Duration);

    impl Workload for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> {
            std::thread::sleep(self.0);
            Ok(1)
        }
    }

    fn thread_cfg(workers: usize) -> Config {
        Config {
            workers,
            isolation: Isolation::Thread,
            progress_poll: Duration::from_millis(5),
            result_poll: Duration::from_millis(5),
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_fails_backlog_and_is_idempotent() {
        let sup = Supervisor::builder(thread_cfg(1))
            .with_workload(Arc::new(Sleepy(Duration::from_millis(20))))
            .build()
            .unwrap();
        let gateway = sup.gateway();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(gateway.submit(5).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (a, b) = tokio::join!(sup.shutdown(), sup.shutdown());
        assert!(a.is_ok() && b.is_ok());
        assert!(sup.shutdown().await.is_ok());
        assert!(sup.channels().tasks.is_closed());

        let mut not_dispatched = 0;
        for id in &ids {
            let task = sup.registry().get(id).await.unwrap();
            if task.error.as_ref().is_some_and(|e| e.label == "shutdown_before_dispatch") {
                assert_eq!(task.status, TaskStatus::Failed);
                not_dispatched += 1;
            }
        }
        assert!(not_dispatched >= 3, "backlog was computed instead of drained");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_grace_exceeded_reports_stuck_workers() {
        let cfg = Config {
            grace: Some(Duration::from_millis(50)),
            ..thread_cfg(1)
        };
        let sup = Supervisor::builder(cfg)
            .with_workload(Arc::new(Sleepy(Duration::from_millis(200))))
            .build()
            .unwrap();

        sup.gateway().submit(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        match sup.shutdown().await {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, vec![0]),
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drained_unit_is_not_reported_twice() {
        let sup = Supervisor::builder(thread_cfg(1)).build().unwrap();
        let id = TaskId::from("late");
        sup.registry().create(id.clone(), 1).await.unwrap();
        sup.registry()
            .apply_result(&ResultEvent::completed(id.clone(), 1))
            .await;
        sup.shutdown().await.unwrap();

        let task = sup.registry().get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }
}
