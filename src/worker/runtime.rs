//! # Worker loop: pop a command, compute, report, repeat.
//!
//! The same loop runs in two places:
//! - inside a **child process** (`procvisor worker`), attached to stdin/stdout
//!   through [`StdioEndpoint`];
//! - on an **OS thread** inside the service, attached to the channels directly
//!   through [`ChannelEndpoint`].
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► endpoint.next_command()  (blocks)
//!   │     ├─ Err(closed)        ─► exit (Closed)
//!   │     ├─ Shutdown sentinel  ─► exit (Sentinel)
//!   │     └─ Run(unit)
//!   ├─► compute(unit) ─► endpoint.progress(ev) × K
//!   └─► endpoint.result(ev)      (exactly once per unit)
//! }
//! ```

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::error::ChannelClosed;
use crate::events::{
    Channels, Command, Outcome, ProgressEvent, ResultEvent, WorkerMessage, wire,
};
use crate::worker::compute::{Workload, compute};

/// Where a worker takes its commands from.
pub trait CommandSource {
    /// Blocks until the next command; `Err` once the source is closed.
    fn next_command(&mut self) -> Result<Command, ChannelClosed>;
}

/// Where a worker reports progress and results to.
pub trait EventSink {
    /// Reports one progress event.
    fn progress(&mut self, ev: ProgressEvent) -> Result<(), ChannelClosed>;
    /// Reports the terminal event of a unit.
    fn result(&mut self, ev: ResultEvent) -> Result<(), ChannelClosed>;
}

/// Why a worker loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// Popped the termination sentinel.
    Sentinel,
    /// A channel or pipe closed underneath the worker.
    Closed,
}

/// Summary of one worker's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub exit: WorkerExit,
    /// Units that produced a result.
    pub units: u64,
    /// Units whose result was `failed`.
    pub failed: u64,
}

/// Runs the worker loop until the sentinel arrives or a channel closes.
pub fn run_worker<W, E>(
    worker: usize,
    workload: &W,
    interval: u64,
    endpoint: &mut E,
) -> WorkerReport
where
    W: Workload + ?Sized,
    E: CommandSource + EventSink + ?Sized,
{
    let mut report = WorkerReport {
        exit: WorkerExit::Closed,
        units: 0,
        failed: 0,
    };

    loop {
        let unit = match endpoint.next_command() {
            Ok(Command::Run(unit)) => unit,
            Ok(Command::Shutdown) => {
                report.exit = WorkerExit::Sentinel;
                break;
            }
            Err(ChannelClosed) => break,
        };

        debug!(
            worker,
            task_id = %unit.task_id,
            steps = unit.steps_total,
            workload = workload.name(),
            "unit started"
        );
        let Ok(result) = compute(workload, &unit, interval, |ev| endpoint.progress(ev)) else {
            break;
        };
        let failed = result.status == Outcome::Failed;
        if endpoint.result(result).is_err() {
            break;
        }

        report.units += 1;
        if failed {
            report.failed += 1;
        }
        debug!(worker, task_id = %unit.task_id, failed, "unit finished");
    }

    debug!(worker, exit = ?report.exit, units = report.units, "worker loop ended");
    report
}

/// Attaches a worker running on an OS thread to the shared channels.
#[derive(Clone, Debug)]
pub struct ChannelEndpoint {
    channels: Channels,
}

impl ChannelEndpoint {
    pub fn new(channels: Channels) -> Self {
        Self { channels }
    }
}

impl CommandSource for ChannelEndpoint {
    fn next_command(&mut self) -> Result<Command, ChannelClosed> {
        self.channels.tasks.pop_blocking()
    }
}

impl EventSink for ChannelEndpoint {
    fn progress(&mut self, ev: ProgressEvent) -> Result<(), ChannelClosed> {
        self.channels.progress.push_blocking(ev)
    }

    fn result(&mut self, ev: ResultEvent) -> Result<(), ChannelClosed> {
        self.channels.results.push_blocking(ev)
    }
}

/// Attaches a worker running in a child process to its stdin/stdout pipes.
///
/// EOF on the input counts as a closed channel. Undecodable lines are logged
/// and skipped.
#[derive(Debug)]
pub struct StdioEndpoint<R, W> {
    input: R,
    output: W,
    line: String,
}

impl<R: BufRead, W: Write> StdioEndpoint<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            line: String::new(),
        }
    }

    fn send(&mut self, msg: &WorkerMessage) -> Result<(), ChannelClosed> {
        let line = wire::encode_line(msg).map_err(|e| {
            warn!(error = %e, "failed to encode worker message");
            ChannelClosed
        })?;
        self.output
            .write_all(line.as_bytes())
            .and_then(|()| self.output.flush())
            .map_err(|_| ChannelClosed)
    }
}

impl<R: BufRead, W: Write> CommandSource for StdioEndpoint<R, W> {
    fn next_command(&mut self) -> Result<Command, ChannelClosed> {
        loop {
            self.line.clear();
            match self.input.read_line(&mut self.line) {
                Ok(0) | Err(_) => return Err(ChannelClosed),
                Ok(_) if self.line.trim().is_empty() => continue,
                Ok(_) => match wire::decode_line::<Command>(&self.line) {
                    Ok(cmd) => return Ok(cmd),
                    Err(e) => warn!(error = %e, "skipping malformed command"),
                },
            }
        }
    }
}

impl<R: BufRead, W: Write> EventSink for StdioEndpoint<R, W> {
    fn progress(&mut self, ev: ProgressEvent) -> Result<(), ChannelClosed> {
        self.send(&WorkerMessage::Progress(ev))
    }

    fn result(&mut self, ev: ResultEvent) -> Result<(), ChannelClosed> {
        self.send(&WorkerMessage::Result(ev))
    }
}

/// Entry point of the `worker` subcommand: serves commands from stdin until the
/// sentinel or EOF.
pub fn serve_stdio<W: Workload + ?Sized>(
    worker: usize,
    workload: &W,
    interval: u64,
) -> WorkerReport {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut endpoint = StdioEndpoint::new(stdin.lock(), stdout.lock());
    run_worker(worker, workload, interval, &mut endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TaskId, WorkUnit};
    use crate::worker::compute::SquareSum;
    use std::io::Cursor;

    fn script(cmds: &[Command]) -> Cursor<Vec<u8>> {
        let text: String = cmds.iter().map(|c| wire::encode_line(c).unwrap()).collect();
        Cursor::new(text.into_bytes())
    }

    fn decode_all(out: &[u8]) -> Vec<WorkerMessage> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| wire::decode_line(l).unwrap())
            .collect()
    }

    #[test]
    fn test_stdio_worker_reports_then_stops_at_sentinel() {
        let input = script(&[
            Command::Run(WorkUnit::new(TaskId::from("a"), 20)),
            Command::Shutdown,
            Command::Run(WorkUnit::new(TaskId::from("never"), 5)),
        ]);
        let mut out = Vec::new();
        let mut endpoint = StdioEndpoint::new(input, &mut out);

        let report = run_worker(0, &SquareSum { span: 3 }, 10, &mut endpoint);
        assert_eq!(report.exit, WorkerExit::Sentinel);
        assert_eq!(report.units, 1);

        let msgs = decode_all(&out);
        assert_eq!(msgs.len(), 3);
        assert!(matches!(&msgs[0], WorkerMessage::Progress(p) if p.step_index == 10));
        assert!(matches!(&msgs[1], WorkerMessage::Progress(p) if p.step_index == 20));
        match &msgs[2] {
            WorkerMessage::Result(r) => {
                assert_eq!(r.task_id, TaskId::from("a"));
                // span 3 → 1 + 4 per step
                assert_eq!(r.final_aggregate, Some(100));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_stdio_worker_skips_garbage_and_exits_on_eof() {
        let mut bytes = b"garbage\n\n".to_vec();
        bytes.extend(script(&[Command::Run(WorkUnit::new(TaskId::from("a"), 1))]).into_inner());
        let mut out = Vec::new();
        let mut endpoint = StdioEndpoint::new(Cursor::new(bytes), &mut out);

        let report = run_worker(0, &SquareSum { span: 2 }, 1, &mut endpoint);
        assert_eq!(report.exit, WorkerExit::Closed);
        assert_eq!(report.units, 1);
        assert_eq!(decode_all(&out).len(), 2);
    }

    #[test]
    fn test_channel_worker_on_thread() {
        let channels = Channels::new(0);
        channels
            .tasks
            .push(Command::Run(WorkUnit::new(TaskId::from("a"), 30)))
            .unwrap();
        channels.tasks.push(Command::Shutdown).unwrap();

        let mut endpoint = ChannelEndpoint::new(channels.clone());
        let handle =
            std::thread::spawn(move || run_worker(1, &SquareSum { span: 2 }, 10, &mut endpoint));
        let report = handle.join().unwrap();

        assert_eq!(report.exit, WorkerExit::Sentinel);
        assert_eq!(channels.progress.len(), 3);
        assert_eq!(channels.results.len(), 1);
    }
}
