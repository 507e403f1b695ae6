//! # procvisor
//!
//! **procvisor** is a task gateway that accepts CPU-bound jobs over HTTP, fans
//! them out to a supervised pool of worker processes, and lets clients poll
//! incremental progress and the final result.
//!
//! The gateway side runs on one cooperative (single-threaded) Tokio scheduler;
//! the computation runs in N worker OS processes in parallel. The two sides
//! share **no mutable state**: they talk only through three FIFO channels.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  HTTP client
//!     │  POST /task            GET /task/{id}
//!     ▼                              ▲
//! ┌──────────────────────────────────┴────────────────────────────────┐
//! │  Gateway (submit / status)                                        │
//! │   ├─ TaskRegistry.create(id) ─► status = queued                   │
//! │   └─ TaskQueue.push(Run(unit))                                    │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//!  ┌───────────────┐  pop   ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │   TaskQueue   │ ─────► │ worker 1 │ │ worker 2 │ │ worker N │   (processes)
//!  └───────────────┘        └────┬─────┘ └────┬─────┘ └────┬─────┘
//!                                │ progress / result      │
//!                                ▼                        ▼
//!                  ┌─────────────────────┐  ┌─────────────────────┐
//!                  │   ProgressChannel   │  │    ResultChannel    │
//!                  └─────────┬───────────┘  └─────────┬───────────┘
//!                            ▼ try_pop + backoff      ▼ try_pop + backoff
//!                   ProgressCollector          ResultCollector
//!                            └──────────┬─────────────┘
//!                                       ▼
//!                                 TaskRegistry
//! ```
//!
//! ### Task lifecycle
//! ```text
//! queued ──(first progress)──► running ──(result: completed)──► completed
//!    │                            │
//!    └────────────────────────────┴──(result: failed)─────────► failed
//! ```
//! - progress never decreases; a completed task reports `progress = 100`
//! - each task reaches a terminal status exactly once
//!
//! ## Features
//! | Area            | Description                                                 | Key types                                |
//! |-----------------|-------------------------------------------------------------|------------------------------------------|
//! | **Gateway**     | Validate, register and enqueue; pure status reads.          | [`Gateway`], [`router`]                  |
//! | **Supervision** | Worker pool, collectors, idempotent graceful shutdown.      | [`Supervisor`], [`SupervisorBuilder`]    |
//! | **Workers**     | Process or thread workers running a [`Workload`].           | [`Workload`], [`SquareSum`], [`Isolation`] |
//! | **Registry**    | Single source of truth for task state.                      | [`TaskRegistry`], [`Task`]               |
//! | **Channels**    | MPMC FIFOs with async and blocking ends.                    | [`Channel`], [`Channels`]                |
//! | **Policies**    | Respawn backoff for crashed worker processes.               | [`BackoffPolicy`], [`JitterPolicy`]      |
//! | **Errors**      | Typed errors with stable labels.                            | [`SubmitError`], [`ComputeError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use procvisor::{Config, StepError, Supervisor, TaskStatus, WorkUnit, Workload};
//!
//! struct Ones;
//!
//! impl Workload for Ones {
//!     fn name(&self) -> &str { "ones" }
//!     fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> { Ok(1) }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         workers: 2,
//!         progress_poll: Duration::from_millis(5),
//!         result_poll: Duration::from_millis(5),
//!         ..Config::default()
//!     };
//!     let sup = Supervisor::builder(cfg).with_workload(Arc::new(Ones)).build()?;
//!
//!     let gateway = sup.gateway();
//!     let id = gateway.submit(40).await?;
//!     loop {
//!         let task = gateway.status(&id).await.ok_or("task vanished")?;
//!         if task.status == TaskStatus::Completed {
//!             assert_eq!(task.final_result, Some(40));
//!             break;
//!         }
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!
//!     sup.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod gateway;
mod policies;
mod registry;
mod worker;

// ---- Public re-exports ----

pub use config::{Config, Isolation};
pub use self::core::{Supervisor, SupervisorBuilder, wait_for_shutdown_signal};
pub use error::{ChannelClosed, ComputeError, PushError, RuntimeError, SubmitError, WireError};
pub use events::{
    Channel, Channels, Command, Failure, Outcome, ProgressEvent, ResultEvent, TaskId, WorkUnit,
    WorkerMessage, wire,
};
pub use gateway::Gateway;
pub use gateway::http::{ApiError, router};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use registry::{
    Applied, DuplicateTask, ProgressSnapshot, StatusCounts, Task, TaskRegistry, TaskStatus,
};
pub use worker::{
    ChannelEndpoint, CommandSource, EventSink, SquareSum, StdioEndpoint, StepError,
    WorkerCommand, WorkerExit, WorkerReport, Workload, compute, run_worker, serve_stdio,
};
