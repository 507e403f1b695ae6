//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the supervisor, the
//! collectors, the gateway and the workers.
//!
//! ## Sentinel values
//! - `workers = 0` → one worker per available CPU core
//! - `queue_capacity = 0` → unbounded TaskQueue (submission never rejected for load)
//! - `grace = None` → shutdown waits for in-flight computations indefinitely
//! - `worker_program = None` → child processes run the current executable

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// How workers are isolated from the gateway side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Isolation {
    /// One OS process per worker, attached over stdin/stdout pipes.
    #[default]
    Process,
    /// One OS thread per worker inside the service process.
    ///
    /// Use when:
    /// - a custom [`Workload`](crate::Workload) must run (closures cannot cross
    ///   a process boundary)
    /// - testing without a built binary
    Thread,
}

/// Global configuration for the service.
///
/// ## Field semantics
/// - `workers`: worker pool size (`0` = CPU count)
/// - `progress_interval`: batching interval B; progress every B steps and on the last step
/// - `progress_poll` / `result_poll`: collector backoff when their channel is empty
/// - `queue_capacity`: TaskQueue bound (`0` = unbounded)
/// - `span`: intensity of the default workload (inner sum bound per step)
/// - `isolation`: processes or threads
/// - `worker_program`: executable started for process workers
/// - `respawn`: delay before restarting a crashed worker process
/// - `grace`: optional bound on how long shutdown waits for workers
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of workers (`0` = one per CPU core).
    pub workers: usize,

    /// Emit progress every `progress_interval` steps (minimum 1).
    pub progress_interval: u64,

    /// Backoff of the ProgressCollector when the ProgressChannel is empty.
    ///
    /// Bounds how stale `progress` can be for status readers.
    pub progress_poll: Duration,

    /// Backoff of the ResultCollector when the ResultChannel is empty.
    pub result_poll: Duration,

    /// Capacity of the TaskQueue.
    ///
    /// - `0` = unbounded
    /// - `n > 0` = submissions beyond `n` queued units fail with `Overloaded`
    pub queue_capacity: usize,

    /// Inner sum bound of the default [`SquareSum`](crate::SquareSum) workload.
    pub span: u64,

    /// Process or thread workers.
    pub isolation: Isolation,

    /// Program started for each process worker (`None` = current executable).
    ///
    /// It is invoked as `<program> worker --index N --progress-interval B --span S`.
    pub worker_program: Option<PathBuf>,

    /// Backoff used before respawning a worker process that died mid-task.
    pub respawn: BackoffPolicy,

    /// Upper bound for the shutdown wait; stuck process workers are killed.
    pub grace: Option<Duration>,
}

impl Config {
    /// Returns the effective worker count (never 0).
    #[inline]
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    /// Returns the TaskQueue bound as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` queued units
    #[inline]
    pub fn queue_bound(&self) -> Option<usize> {
        if self.queue_capacity == 0 {
            None
        } else {
            Some(self.queue_capacity)
        }
    }

    /// Returns the batching interval clamped to a minimum of 1.
    #[inline]
    pub fn interval(&self) -> u64 {
        self.progress_interval.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `workers = 0` (one per CPU core)
    /// - `progress_interval = 10`
    /// - `progress_poll = 100ms`, `result_poll = 500ms`
    /// - `queue_capacity = 0` (unbounded)
    /// - `span = 10_000`
    /// - `isolation = Process`
    /// - `respawn`: 100ms doubling up to 5s, equal jitter
    /// - `grace = None`
    fn default() -> Self {
        Self {
            workers: 0,
            progress_interval: 10,
            progress_poll: Duration::from_millis(100),
            result_poll: Duration::from_millis(500),
            queue_capacity: 0,
            span: 10_000,
            isolation: Isolation::Process,
            worker_program: None,
            respawn: BackoffPolicy {
                first: Duration::from_millis(100),
                max: Duration::from_secs(5),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
            grace: None,
        }
    }
}
