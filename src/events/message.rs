//! # Messages exchanged between the gateway side and the workers.
//!
//! Three message kinds cross the worker boundary, plus the termination sentinel:
//!
//! ```text
//!                 TaskQueue: Command                 ProgressChannel / ResultChannel
//! Gateway ──► Run(WorkUnit) | Shutdown ──► Worker ──► ProgressEvent* ── ResultEvent ──► Collectors
//! ```
//!
//! All types are plain data: workers receive copies and never see registry state.
//! On the process boundary they travel as JSON lines (see [`wire`](super::wire)),
//! internally tagged by `"type"`.
//!
//! ## Example
//! ```rust
//! use procvisor::{ProgressEvent, TaskId, WorkUnit};
//!
//! let unit = WorkUnit::new(TaskId::generate(), 100);
//! let ev = ProgressEvent::at_step(&unit, 10, 42);
//! assert_eq!(ev.percent_complete, 10.0);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComputeError;

/// Opaque, unique task identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh identifier (UUID v4). Never reused within a process.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Workload of one task: identity plus step count. Immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkUnit {
    /// Task this unit computes.
    pub task_id: TaskId,
    /// Number of logical steps (always positive for dispatched units).
    pub steps_total: u64,
}

impl WorkUnit {
    /// Creates a unit for `task_id` with `steps_total` steps.
    pub fn new(task_id: TaskId, steps_total: u64) -> Self {
        Self {
            task_id,
            steps_total,
        }
    }
}

/// Item carried by the TaskQueue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Compute one task.
    Run(WorkUnit),
    /// Termination sentinel: the worker that pops it exits its loop.
    Shutdown,
}

/// Incremental progress of one task, emitted every `progress_interval` steps
/// and on the final step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Task the progress belongs to.
    pub task_id: TaskId,
    /// 1-based index of the step just finished.
    pub step_index: u64,
    /// `step_index / steps_total * 100`.
    pub percent_complete: f64,
    /// Aggregate accumulated so far.
    pub partial_aggregate: u64,
}

impl ProgressEvent {
    /// Builds the event for `unit` after step `step_index`.
    pub fn at_step(unit: &WorkUnit, step_index: u64, partial_aggregate: u64) -> Self {
        Self {
            task_id: unit.task_id.clone(),
            step_index,
            percent_complete: percent(step_index, unit.steps_total),
            partial_aggregate,
        }
    }
}

fn percent(step: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (step as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Terminal outcome of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Computation ran all steps.
    Completed,
    /// Computation faulted; `error` carries the descriptor.
    Failed,
}

/// Failure descriptor carried by a failed [`ResultEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Stable label, e.g. `computation_panicked`.
    pub label: String,
    /// Human-readable detail.
    pub message: String,
}

impl From<&ComputeError> for Failure {
    fn from(err: &ComputeError) -> Self {
        Self {
            label: err.as_label().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Terminal event, emitted exactly once per task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    /// Task being finalized.
    pub task_id: TaskId,
    /// Completed or failed.
    pub status: Outcome,
    /// Final aggregate; present iff `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_aggregate: Option<u64>,
    /// Failure descriptor; present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl ResultEvent {
    /// Successful completion with `aggregate`.
    pub fn completed(task_id: TaskId, aggregate: u64) -> Self {
        Self {
            task_id,
            status: Outcome::Completed,
            final_aggregate: Some(aggregate),
            error: None,
        }
    }

    /// Failure described by `err`.
    pub fn failed(task_id: TaskId, err: &ComputeError) -> Self {
        Self {
            task_id,
            status: Outcome::Failed,
            final_aggregate: None,
            error: Some(Failure::from(err)),
        }
    }
}

/// Message written by a worker process on its stdout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Relayed to the ProgressChannel.
    Progress(ProgressEvent),
    /// Relayed to the ResultChannel; ends the unit in flight.
    Result(ResultEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_fractional() {
        let unit = WorkUnit::new(TaskId::from("t"), 3);
        let ev = ProgressEvent::at_step(&unit, 1, 0);
        assert!((ev.percent_complete - 33.333).abs() < 0.01);
        assert_eq!(ProgressEvent::at_step(&unit, 3, 0).percent_complete, 100.0);
    }

    #[test]
    fn test_failed_result_carries_label() {
        let ev = ResultEvent::failed(TaskId::from("t"), &ComputeError::Overflow { step: 4 });
        assert_eq!(ev.status, Outcome::Failed);
        assert!(ev.final_aggregate.is_none());
        let failure = ev.error.as_ref().map(|f| f.label.as_str());
        assert_eq!(failure, Some("computation_overflow"));
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(TaskId::generate(), TaskId::generate());
    }
}
