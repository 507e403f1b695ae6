//! # Workers: where the CPU-bound computation happens.
//!
//! ## Contents
//! - [`compute`]: the step loop for one unit ([`Workload`], [`SquareSum`])
//! - [`runtime`]: the pop/compute/report loop shared by both worker kinds
//! - [`process`]: child process workers and their gateway-side drivers
//! - [`thread`]: in-process workers on blocking OS threads
//!
//! ```text
//!             ┌─► process driver ◄─ stdin/stdout ─► `procvisor worker` (serve_stdio)
//! Channels ───┤
//!             └─► spawn_blocking ─► ThreadWorker ─► run_worker
//! ```

mod compute;
mod process;
mod runtime;
mod thread;

pub use compute::{SquareSum, StepError, Workload, compute};
pub use process::WorkerCommand;
pub use runtime::{
    ChannelEndpoint, CommandSource, EventSink, StdioEndpoint, WorkerExit, WorkerReport,
    run_worker, serve_stdio,
};

pub(crate) use process::ProcessWorker;
pub(crate) use thread::ThreadWorker;
