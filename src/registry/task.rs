//! # Task state as stored by the registry.
//!
//! ```text
//! queued ──(first progress)──► running ──(result)──► completed | failed
//!    └──────────────────────(result)───────────────► completed | failed
//! ```
//!
//! Terminal states are final: `completed_at`, `final_result` / `error` are set
//! exactly once, on the terminal transition.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{Failure, TaskId};

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered and waiting for a worker.
    Queued,
    /// At least one progress event merged.
    Running,
    /// Finished all steps.
    Completed,
    /// Computation faulted, worker crashed, or never dispatched.
    Failed,
}

impl TaskStatus {
    /// True for `Completed` and `Failed`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Lowercase name as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One merged progress event, kept for audit/debug.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub step_index: u64,
    pub percent_complete: f64,
    pub partial_aggregate: u64,
    /// When the collector merged the event.
    pub at: DateTime<Utc>,
}

/// Snapshot of one task.
///
/// Values handed out by [`TaskRegistry::get`](super::TaskRegistry::get) are
/// clones; mutating them has no effect on the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub steps_total: u64,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only, in merge order.
    pub partial_history: Vec<ProgressSnapshot>,
    /// Set iff `status == Completed`.
    pub final_result: Option<u64>,
    /// Set iff `status == Failed`.
    pub error: Option<Failure>,
}

impl Task {
    pub(crate) fn queued(id: TaskId, steps_total: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TaskStatus::Queued,
            progress: 0.0,
            steps_total,
            created_at: now,
            last_update_at: now,
            completed_at: None,
            partial_history: Vec::new(),
            final_result: None,
            error: None,
        }
    }

    /// True once the task reached `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
