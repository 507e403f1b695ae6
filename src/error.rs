//! Error types used by the procvisor runtime, gateway and workers.
//!
//! This module defines the error taxonomy of the service:
//!
//! - [`SubmitError`]: a submission rejected synchronously by the gateway.
//! - [`ComputeError`]: a fault while computing one task; always converted into
//!   a failed [`ResultEvent`](crate::ResultEvent), never propagated.
//! - [`ChannelClosed`] / [`PushError`]: channel operations after shutdown began.
//! - [`RuntimeError`]: failures of the supervisor lifecycle itself.
//! - [`WireError`]: malformed lines on the worker process boundary.
//!
//! Every enum provides `as_label` (a stable snake_case label for logs) in the
//! same way so call sites can log errors uniformly.

use std::time::Duration;
use thiserror::Error;

/// # Submission rejected by the gateway.
///
/// No registry entry exists for a rejected submission.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Step count must be a positive integer.
    #[error("stepsTotal must be a positive integer, got {steps}")]
    InvalidSteps {
        /// The rejected step count.
        steps: i64,
    },

    /// Bounded task queue is full.
    #[error("task queue is full (capacity {capacity})")]
    Overloaded {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Shutdown has begun; no new work is accepted.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::SubmitError;
    ///
    /// let err = SubmitError::InvalidSteps { steps: 0 };
    /// assert_eq!(err.as_label(), "submit_invalid_steps");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::InvalidSteps { .. } => "submit_invalid_steps",
            SubmitError::Overloaded { .. } => "submit_overloaded",
            SubmitError::ShuttingDown => "submit_shutting_down",
        }
    }
}

/// # Failure of one task's computation.
///
/// Whatever happens inside a worker ends up as exactly one of these, carried
/// to the registry as the `error` of a failed result.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// The workload reported an unrecoverable fault.
    #[error("computation failed at step {step}: {error}")]
    Failed {
        /// Step index (1-based) at which the fault happened.
        step: u64,
        /// The underlying error message.
        error: String,
    },

    /// The running aggregate no longer fits its numeric type.
    #[error("aggregate overflowed at step {step}")]
    Overflow {
        /// Step index (1-based) at which the overflow happened.
        step: u64,
    },

    /// The workload panicked; the panic was caught inside the worker.
    #[error("computation panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The worker process died while this task was in flight.
    #[error("worker {worker} exited unexpectedly: {reason}")]
    Crashed {
        /// Worker index.
        worker: usize,
        /// What the driver observed (EOF, exit status, broken pipe).
        reason: String,
    },

    /// The task was still queued when shutdown began.
    #[error("service shut down before the task was dispatched")]
    NotDispatched,
}

impl ComputeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComputeError::Failed { .. } => "computation_failed",
            ComputeError::Overflow { .. } => "computation_overflow",
            ComputeError::Panicked { .. } => "computation_panicked",
            ComputeError::Crashed { .. } => "worker_crashed",
            ComputeError::NotDispatched => "shutdown_before_dispatch",
        }
    }
}

/// Channel was closed; producers must stop offering work.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("channel closed")]
pub struct ChannelClosed;

/// Non-blocking push failed; the rejected item is handed back.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Bounded channel is at capacity.
    #[error("channel full")]
    Full(T),
    /// Channel was closed.
    #[error("channel closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Returns the item that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(t) | PushError::Closed(t) => t,
        }
    }
}

/// # Errors produced by the supervisor lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A worker process could not be started.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        /// Worker index.
        worker: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Shutdown grace period was exceeded; the listed workers were killed.
    #[error("shutdown timeout {grace:?} exceeded; stuck workers: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Indexes of workers that did not exit in time.
        stuck: Vec<usize>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Spawn { .. } => "runtime_spawn_failed",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// Malformed message on the worker process boundary.
#[derive(Error, Debug)]
pub enum WireError {
    /// Line was not valid JSON for the expected message type.
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Reading from or writing to the pipe failed.
    #[error("pipe i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_returns_item() {
        assert_eq!(PushError::Full(7).into_inner(), 7);
        assert_eq!(PushError::Closed("x").into_inner(), "x");
    }

    #[test]
    fn test_compute_error_labels_are_stable() {
        let crashed = ComputeError::Crashed {
            worker: 2,
            reason: "eof".into(),
        };
        assert_eq!(crashed.as_label(), "worker_crashed");
        assert_eq!(crashed.to_string(), "worker 2 exited unexpectedly: eof");
        assert_eq!(ComputeError::NotDispatched.as_label(), "shutdown_before_dispatch");
    }
}
