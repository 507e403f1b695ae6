//! # Thread workers: the worker loop on a blocking OS thread.
//!
//! Used when the service runs with [`Isolation::Thread`](crate::Isolation::Thread),
//! typically with a custom [`Workload`] that cannot cross a process boundary.
//! The loop is the same [`run_worker`] a child process runs, attached directly
//! to the shared channels.

use std::sync::Arc;

use tracing::info;

use crate::events::Channels;
use crate::worker::compute::Workload;
use crate::worker::runtime::{ChannelEndpoint, WorkerReport, run_worker};

/// One in-process worker.
pub(crate) struct ThreadWorker {
    pub(crate) index: usize,
    pub(crate) workload: Arc<dyn Workload>,
    pub(crate) interval: u64,
    pub(crate) channels: Channels,
}

impl ThreadWorker {
    /// Runs until the sentinel or a closed TaskQueue. Blocks the calling thread.
    pub(crate) fn run(self) -> WorkerReport {
        let mut endpoint = ChannelEndpoint::new(self.channels);
        let report = run_worker(self.index, self.workload.as_ref(), self.interval, &mut endpoint);
        info!(
            worker = self.index,
            exit = ?report.exit,
            units = report.units,
            "worker thread stopped"
        );
        report
    }
}
