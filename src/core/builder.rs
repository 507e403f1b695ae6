use std::sync::Arc;

use crate::config::{Config, Isolation};
use crate::error::RuntimeError;
use crate::worker::Workload;

use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`] with optional features.
pub struct SupervisorBuilder {
    cfg: Config,
    workload: Option<Arc<dyn Workload>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            workload: None,
        }
    }

    /// Runs `workload` instead of the default [`SquareSum`](crate::SquareSum).
    ///
    /// A custom workload cannot cross a process boundary, so this also switches
    /// the pool to [`Isolation::Thread`].
    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = Some(workload);
        self.cfg.isolation = Isolation::Thread;
        self
    }

    /// Overrides how workers are isolated.
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.cfg.isolation = isolation;
        self
    }

    /// Starts the workers and collectors and returns the running Supervisor.
    ///
    /// Must be called from within a Tokio runtime. Fails if a worker process
    /// cannot be spawned; workers started before the failure are torn down.
    pub fn build(self) -> Result<Arc<Supervisor>, RuntimeError> {
        if self.workload.is_some() && self.cfg.isolation == Isolation::Process {
            tracing::warn!("custom workload ignored by process workers");
        }
        Supervisor::startup(self.cfg, self.workload)
    }
}
