//! # Request gateway: the synchronous face of the service.
//!
//! [`Gateway`] accepts submissions and answers status reads. It never waits for
//! a worker: a submission only creates the registry entry and enqueues the unit.
//!
//! ```text
//! submit(steps)
//!   ├─ steps <= 0          ─► Err(InvalidSteps)      (no entry)
//!   ├─ admission lock
//!   │   ├─ shutting down   ─► Err(ShuttingDown)      (no entry)
//!   │   ├─ queue full      ─► Err(Overloaded)        (no entry)
//!   │   ├─ registry.create(id, steps)   status = queued
//!   │   └─ TaskQueue.push(Run(unit))
//!   └─► Ok(id)
//!
//! status(id) ─► registry.get(id) (snapshot) | None
//! ```
//!
//! The HTTP surface lives in [`http`].

pub mod http;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ComputeError, PushError, SubmitError};
use crate::events::{Channel, Command, ResultEvent, TaskId, WorkUnit};
use crate::registry::{Task, TaskRegistry};

/// Accepts submissions and serves status reads.
#[derive(Debug)]
pub struct Gateway {
    registry: Arc<TaskRegistry>,
    tasks: Channel<Command>,
    token: CancellationToken,
    admission: Mutex<()>,
}

impl Gateway {
    pub(crate) fn new(
        registry: Arc<TaskRegistry>,
        tasks: Channel<Command>,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            tasks,
            token,
            admission: Mutex::new(()),
        }
    }

    /// Registers a task with `steps_total` steps and enqueues it.
    ///
    /// Returns as soon as the unit is queued; the task starts as `queued`.
    pub async fn submit(&self, steps_total: i64) -> Result<TaskId, SubmitError> {
        let steps = match u64::try_from(steps_total) {
            Ok(n) if n > 0 => n,
            _ => return Err(SubmitError::InvalidSteps { steps: steps_total }),
        };

        let _admitted = self.admission.lock().await;
        if self.token.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        if self.tasks.is_full() {
            return Err(self.overloaded());
        }

        let id = self.register(steps).await;
        match self.tasks.push(Command::Run(WorkUnit::new(id.clone(), steps))) {
            Ok(()) => {
                info!(task_id = %id, steps, "task submitted");
                Ok(id)
            }
            Err(e) => {
                let err = match e {
                    PushError::Full(_) => self.overloaded(),
                    PushError::Closed(_) => SubmitError::ShuttingDown,
                };
                warn!(task_id = %id, error = %err, "task registered but not enqueued");
                self.registry
                    .apply_result(&ResultEvent::failed(id, &ComputeError::NotDispatched))
                    .await;
                Err(err)
            }
        }
    }

    /// Snapshot of the task, or `None` if the id is unknown.
    pub async fn status(&self, id: &TaskId) -> Option<Task> {
        self.registry.get(id).await
    }

    /// Task state store this gateway writes to.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until no submission is between its checks and its push.
    pub(crate) async fn fence(&self) {
        drop(self.admission.lock().await);
    }

    async fn register(&self, steps: u64) -> TaskId {
        loop {
            let id = TaskId::generate();
            match self.registry.create(id.clone(), steps).await {
                Ok(()) => return id,
                Err(dup) => warn!(task_id = %dup.0, "generated id collided; retrying"),
            }
        }
    }

    fn overloaded(&self) -> SubmitError {
        SubmitError::Overloaded {
            capacity: self.tasks.capacity().unwrap_or(0),
        }
    }
}
