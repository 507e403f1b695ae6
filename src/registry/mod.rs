//! # Task registry: the single source of truth queried by clients.
//!
//! Maps task identity to [`Task`] state. Only three writers exist:
//! - `Gateway::submit` → [`TaskRegistry::create`]
//! - ProgressCollector → [`TaskRegistry::apply_progress`]
//! - ResultCollector   → [`TaskRegistry::apply_result`]
//!
//! ## Architecture
//! ```text
//! Gateway.submit ──► create(id, steps) ─────┐
//! ProgressCollector ──► apply_progress(ev) ─┼──► RwLock<HashMap<TaskId, Task>>
//! ResultCollector ──► apply_result(ev) ─────┘            │
//!                                                       ▼
//!                               Gateway.status ──► get(id) (cloned snapshot)
//! ```
//!
//! ## Rules
//! - Every mutation happens under the write lock, so readers never observe a
//!   partially updated task.
//! - Events for unknown ids are dropped and logged; they cannot affect other tasks.
//! - A task reaches a terminal status at most once; later events are dropped.
//! - Progress never decreases; a lower percentage is dropped as stale.
//! - Entries are never removed.

mod task;

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::events::{Failure, Outcome, ProgressEvent, ResultEvent, TaskId};

pub use task::{ProgressSnapshot, Task, TaskStatus};

/// What a registry mutation did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Event merged.
    Applied,
    /// No task with this id; event dropped.
    UnknownTask,
    /// Task already terminal; event dropped.
    AlreadyTerminal,
    /// Progress would go backwards (or repeat below 100); event dropped.
    Stale,
}

/// Tasks per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Tasks that have not reached a terminal status.
    pub fn pending(&self) -> usize {
        self.queued + self.running
    }
}

/// Error returned by [`TaskRegistry::create`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("task {0} already exists")]
pub struct DuplicateTask(pub TaskId);

/// In-memory task registry.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued task. Fails if `id` is already present.
    pub async fn create(&self, id: TaskId, steps_total: u64) -> Result<(), DuplicateTask> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(DuplicateTask(id));
        }
        let task = Task::queued(id.clone(), steps_total, Utc::now());
        tasks.insert(id, task);
        Ok(())
    }

    /// Merges one progress event.
    pub async fn apply_progress(&self, ev: &ProgressEvent) -> Applied {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&ev.task_id) else {
            warn!(task_id = %ev.task_id, step = ev.step_index, "progress for unknown task dropped");
            return Applied::UnknownTask;
        };
        if task.is_terminal() {
            debug!(task_id = %ev.task_id, "progress after terminal status dropped");
            return Applied::AlreadyTerminal;
        }

        let pct = ev.percent_complete.clamp(0.0, 100.0);
        let repeats = pct == task.progress && task.status == TaskStatus::Running && pct < 100.0;
        if pct < task.progress || repeats {
            debug!(task_id = %ev.task_id, pct, current = task.progress, "stale progress dropped");
            return Applied::Stale;
        }

        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.progress = pct;
        task.last_update_at = now;
        task.partial_history.push(ProgressSnapshot {
            step_index: ev.step_index,
            percent_complete: pct,
            partial_aggregate: ev.partial_aggregate,
            at: now,
        });
        debug!(task_id = %ev.task_id, progress = pct, "progress merged");
        Applied::Applied
    }

    /// Finalizes a task from its result event.
    pub async fn apply_result(&self, ev: &ResultEvent) -> Applied {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&ev.task_id) else {
            warn!(task_id = %ev.task_id, "result for unknown task dropped");
            return Applied::UnknownTask;
        };
        if task.is_terminal() {
            warn!(task_id = %ev.task_id, status = task.status.as_str(), "second result dropped");
            return Applied::AlreadyTerminal;
        }

        let now = Utc::now();
        match (ev.status, ev.final_aggregate) {
            (Outcome::Completed, Some(aggregate)) => {
                task.status = TaskStatus::Completed;
                task.progress = 100.0;
                task.final_result = Some(aggregate);
                info!(task_id = %ev.task_id, result = aggregate, "task completed");
            }
            (Outcome::Completed, None) => {
                warn!(task_id = %ev.task_id, "completed result without aggregate");
                task.status = TaskStatus::Failed;
                task.error = Some(Failure {
                    label: "protocol_violation".to_owned(),
                    message: "completed result carried no aggregate".to_owned(),
                });
            }
            (Outcome::Failed, _) => {
                let failure = ev.error.clone().unwrap_or_else(|| Failure {
                    label: "computation_failed".to_owned(),
                    message: "unspecified failure".to_owned(),
                });
                info!(task_id = %ev.task_id, error = %failure.message, "task failed");
                task.status = TaskStatus::Failed;
                task.error = Some(failure);
            }
        }
        task.completed_at = Some(now);
        task.last_update_at = now;
        Applied::Applied
    }

    /// Returns a snapshot of the task, or `None` if the id is unknown.
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Number of tasks ever created.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// True if no task was ever created.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Counts tasks per status.
    pub async fn counts(&self) -> StatusCounts {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .fold(StatusCounts::default(), |mut acc, t| {
                match t.status {
                    TaskStatus::Queued => acc.queued += 1,
                    TaskStatus::Running => acc.running += 1,
                    TaskStatus::Completed => acc.completed += 1,
                    TaskStatus::Failed => acc.failed += 1,
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;
    use crate::events::WorkUnit;

    fn progress(id: &TaskId, step: u64, total: u64) -> ProgressEvent {
        ProgressEvent::at_step(&WorkUnit::new(id.clone(), total), step, step * 2)
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 10).await.unwrap();
        assert_eq!(reg.create(id.clone(), 10).await, Err(DuplicateTask(id)));
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn test_new_task_is_queued_without_result() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 10).await.unwrap();

        let t = reg.get(&id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.progress, 0.0);
        assert!(t.completed_at.is_none());
        assert!(t.final_result.is_none());
        assert!(t.partial_history.is_empty());
    }

    #[tokio::test]
    async fn test_progress_moves_to_running_and_records_history() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 100).await.unwrap();

        assert_eq!(reg.apply_progress(&progress(&id, 10, 100)).await, Applied::Applied);
        assert_eq!(reg.apply_progress(&progress(&id, 20, 100)).await, Applied::Applied);

        let t = reg.get(&id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.progress, 20.0);
        let steps: Vec<u64> = t.partial_history.iter().map(|s| s.step_index).collect();
        assert_eq!(steps, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_progress_never_goes_backwards() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 100).await.unwrap();

        reg.apply_progress(&progress(&id, 50, 100)).await;
        assert_eq!(reg.apply_progress(&progress(&id, 40, 100)).await, Applied::Stale);
        assert_eq!(reg.apply_progress(&progress(&id, 50, 100)).await, Applied::Stale);
        assert_eq!(reg.get(&id).await.unwrap().progress, 50.0);
    }

    #[tokio::test]
    async fn test_progress_may_repeat_at_hundred() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 10).await.unwrap();

        reg.apply_progress(&progress(&id, 10, 10)).await;
        assert_eq!(reg.apply_progress(&progress(&id, 10, 10)).await, Applied::Applied);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_dropped() {
        let reg = TaskRegistry::new();
        let ghost = TaskId::from("ghost");

        assert_eq!(reg.apply_progress(&progress(&ghost, 1, 1)).await, Applied::UnknownTask);
        assert_eq!(
            reg.apply_result(&ResultEvent::completed(ghost.clone(), 1)).await,
            Applied::UnknownTask
        );
        assert!(reg.is_empty().await);
        assert!(reg.get(&ghost).await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_transition_happens_once() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 10).await.unwrap();

        assert_eq!(
            reg.apply_result(&ResultEvent::completed(id.clone(), 99)).await,
            Applied::Applied
        );
        let first = reg.get(&id).await.unwrap();

        let late_failure = ResultEvent::failed(id.clone(), &ComputeError::NotDispatched);
        assert_eq!(reg.apply_result(&late_failure).await, Applied::AlreadyTerminal);
        assert_eq!(
            reg.apply_progress(&progress(&id, 5, 10)).await,
            Applied::AlreadyTerminal
        );

        let after = reg.get(&id).await.unwrap();
        assert_eq!(after, first);
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.progress, 100.0);
        assert_eq!(after.final_result, Some(99));
        assert!(after.error.is_none());
        assert!(after.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_progress() {
        let reg = TaskRegistry::new();
        let id = TaskId::from("a");
        reg.create(id.clone(), 100).await.unwrap();
        reg.apply_progress(&progress(&id, 30, 100)).await;

        let err = ComputeError::Failed {
            step: 31,
            error: "boom".into(),
        };
        reg.apply_result(&ResultEvent::failed(id.clone(), &err)).await;

        let t = reg.get(&id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.progress, 30.0);
        assert!(t.final_result.is_none());
        assert_eq!(t.error.map(|f| f.label), Some("computation_failed".to_owned()));
    }

    #[tokio::test]
    async fn test_counts_by_status() {
        let reg = TaskRegistry::new();
        for name in ["a", "b", "c"] {
            reg.create(TaskId::from(name), 10).await.unwrap();
        }
        reg.apply_progress(&progress(&TaskId::from("b"), 1, 10)).await;
        reg.apply_result(&ResultEvent::completed(TaskId::from("c"), 1))
            .await;

        let counts = reg.counts().await;
        assert_eq!(
            counts,
            StatusCounts {
                queued: 1,
                running: 1,
                completed: 1,
                failed: 0
            }
        );
        assert_eq!(counts.pending(), 2);
    }
}
