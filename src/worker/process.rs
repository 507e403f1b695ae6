//! # Process workers: one child OS process per worker.
//!
//! Each child runs `procvisor worker` (see [`serve_stdio`](crate::serve_stdio))
//! and is attached to the shared channels by a gateway-side **driver** task that
//! speaks the JSON-lines protocol over the child's stdin/stdout.
//!
//! ## Architecture
//! ```text
//!                 ┌────────────────────── driver (tokio task) ───────────────────────┐
//! TaskQueue ──pop─┤ Run(unit) ──► stdin  {"type":"run",...}                          │
//!                 │                         child: compute ─► stdout lines           │
//!                 │ stdout {"type":"progress"} ──► ProgressChannel.push              │
//!                 │ stdout {"type":"result"}   ──► ResultChannel.push  (unit done)   │
//!                 │ Shutdown ──► stdin {"type":"shutdown"} ─► close stdin ─► wait    │
//!                 └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - The driver holds at most **one** unit in flight, so the child sees the same
//!   one-at-a-time loop as a thread worker.
//! - If the child dies or breaks its pipe mid-unit, the driver reports one failed
//!   result (`worker_crashed`) for that unit and respawns the child after
//!   [`BackoffPolicy::next`] of the crash streak. The unit is never re-dispatched.
//! - A child that exits between units is replaced before the next unit is sent;
//!   that unit runs on the fresh child and is not failed.
//! - Lines that are not valid messages for the unit in flight are logged and skipped.
//! - Cancelling the kill token terminates the child and ends the driver.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ChannelClosed, ComputeError, RuntimeError, WireError};
use crate::events::{Channels, Command, Outcome, ResultEvent, WorkUnit, WorkerMessage, wire};
use crate::policies::BackoffPolicy;
use crate::worker::runtime::{WorkerExit, WorkerReport};

/// How to start one worker child.
///
/// The child is invoked as `<program> <args..> --index N`.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    /// Creates a command from an explicit program and arguments.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the `worker` subcommand invocation for `cfg`.
    ///
    /// Falls back to the current executable when `cfg.worker_program` is unset.
    pub fn from_config(cfg: &Config) -> io::Result<Self> {
        let program = match &cfg.worker_program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(
            program,
            [
                "worker".to_owned(),
                "--progress-interval".to_owned(),
                cfg.interval().to_string(),
                "--span".to_owned(),
                cfg.span.to_string(),
            ],
        ))
    }

    fn spawn(&self, index: usize) -> io::Result<Attached> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--index")
            .arg(index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;

        debug!(worker = index, pid = ?child.id(), "worker process started");
        Ok(Attached {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

/// A live child with its pipes.
struct Attached {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Gateway-side driver of one worker process.
pub(crate) struct ProcessWorker {
    index: usize,
    command: WorkerCommand,
    channels: Channels,
    respawn: BackoffPolicy,
    kill: CancellationToken,
    attached: Option<Attached>,
}

impl ProcessWorker {
    /// Starts the first child immediately so spawn failures surface at startup.
    pub(crate) fn start(
        index: usize,
        command: WorkerCommand,
        channels: Channels,
        respawn: BackoffPolicy,
        kill: CancellationToken,
    ) -> Result<Self, RuntimeError> {
        let attached = command
            .spawn(index)
            .map_err(|source| RuntimeError::Spawn {
                worker: index,
                source,
            })?;
        Ok(Self {
            index,
            command,
            channels,
            respawn,
            kill,
            attached: Some(attached),
        })
    }

    /// Drives the child until the sentinel, a closed queue, or the kill token.
    pub(crate) async fn run(mut self) -> WorkerReport {
        let worker = self.index;
        let mut report = WorkerReport {
            exit: WorkerExit::Closed,
            units: 0,
            failed: 0,
        };
        let mut streak: u32 = 0;

        loop {
            let cmd = tokio::select! {
                biased;
                _ = self.kill.cancelled() => break,
                cmd = self.channels.tasks.pop() => cmd,
            };
            let unit = match cmd {
                Ok(Command::Run(unit)) => unit,
                Ok(Command::Shutdown) => {
                    report.exit = WorkerExit::Sentinel;
                    break;
                }
                Err(ChannelClosed) => break,
            };

            let result = self.dispatch(&unit, streak).await;
            if self.kill.is_cancelled() {
                warn!(worker, task_id = %unit.task_id, "worker killed with a unit in flight");
                break;
            }

            report.units += 1;
            let event = match result {
                Ok(event) => {
                    streak = 0;
                    event
                }
                Err(reason) => {
                    streak = streak.saturating_add(1);
                    error!(
                        worker,
                        task_id = %unit.task_id,
                        %reason,
                        streak,
                        "worker process crashed"
                    );
                    self.reap().await;
                    let err = ComputeError::Crashed { worker, reason };
                    ResultEvent::failed(unit.task_id.clone(), &err)
                }
            };
            if event.status == Outcome::Failed {
                report.failed += 1;
            }
            if self.channels.results.push(event).is_err() {
                debug!(worker, task_id = %unit.task_id, "result channel closed; result dropped");
            }
        }

        self.stop().await;
        info!(worker, exit = ?report.exit, units = report.units, "worker process driver stopped");
        report
    }

    /// Respawns a missing child, waiting out the backoff first.
    async fn ensure_child(&mut self, streak: u32) -> Result<(), String> {
        if self.attached.is_some() {
            return Ok(());
        }

        let delay = self.respawn.next(streak.saturating_sub(1));
        debug!(worker = self.index, ?delay, streak, "respawning worker process");
        tokio::select! {
            _ = self.kill.cancelled() => return Err("killed before respawn".to_owned()),
            _ = tokio::time::sleep(delay) => {}
        }

        let attached = self
            .command
            .spawn(self.index)
            .map_err(|e| format!("respawn failed: {e}"))?;
        self.attached = Some(attached);
        Ok(())
    }

    /// Hands `unit` to a live child and relays its messages until the result.
    ///
    /// A child that exited while idle is replaced before the unit is sent, so
    /// only a failure after the child took the unit counts against it.
    async fn dispatch(&mut self, unit: &WorkUnit, streak: u32) -> Result<ResultEvent, String> {
        self.reap_if_exited().await;
        self.ensure_child(streak).await?;
        if let Err(e) = self.send(unit).await {
            debug!(worker = self.index, error = %e, "worker process gone before dispatch");
            self.reap().await;
            self.ensure_child(streak).await?;
            self.send(unit)
                .await
                .map_err(|e| format!("write to worker failed: {e}"))?;
        }
        self.relay(unit).await
    }

    /// Drops a child that exited between units.
    async fn reap_if_exited(&mut self) {
        let Some(attached) = self.attached.as_mut() else {
            return;
        };
        match attached.child.try_wait() {
            Ok(None) => return,
            Ok(Some(status)) => {
                warn!(worker = self.index, %status, "worker process exited while idle");
            }
            Err(e) => {
                warn!(worker = self.index, error = %e, "failed to poll worker process");
            }
        }
        self.reap().await;
    }

    async fn send(&mut self, unit: &WorkUnit) -> Result<(), WireError> {
        let Some(child) = self.attached.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        let line = wire::encode_line(&Command::Run(unit.clone()))?;
        child.stdin.write_all(line.as_bytes()).await?;
        child.stdin.flush().await?;
        Ok(())
    }

    async fn relay(&mut self, unit: &WorkUnit) -> Result<ResultEvent, String> {
        let worker = self.index;
        let Some(child) = self.attached.as_mut() else {
            return Err("no worker process attached".to_owned());
        };

        loop {
            let next = tokio::select! {
                _ = self.kill.cancelled() => return Err("killed".to_owned()),
                next = child.stdout.next_line() => next,
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(match child.child.try_wait() {
                        Ok(Some(status)) => format!("process exited ({status})"),
                        _ => "process closed its output".to_owned(),
                    });
                }
                Err(e) => return Err(WireError::from(e).to_string()),
            };
            if line.trim().is_empty() {
                continue;
            }

            match wire::decode_line::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Progress(ev)) if ev.task_id == unit.task_id => {
                    if self.channels.progress.push(ev).is_err() {
                        debug!(worker, task_id = %unit.task_id, "progress channel closed");
                    }
                }
                Ok(WorkerMessage::Result(ev)) if ev.task_id == unit.task_id => return Ok(ev),
                Ok(other) => warn!(worker, message = ?other, "message for a task not in flight"),
                Err(e) => warn!(worker, error = %e, "skipping malformed worker line"),
            }
        }
    }

    /// Kills and reaps a crashed child.
    async fn reap(&mut self) {
        if let Some(mut attached) = self.attached.take() {
            let _ = attached.child.start_kill();
            let _ = attached.child.wait().await;
        }
    }

    /// Forwards the sentinel to the child and waits for it to exit.
    async fn stop(&mut self) {
        let Some(Attached {
            mut child,
            mut stdin,
            stdout,
        }) = self.attached.take()
        else {
            return;
        };

        if !self.kill.is_cancelled() {
            if let Ok(line) = wire::encode_line(&Command::Shutdown) {
                let _ = stdin.write_all(line.as_bytes()).await;
                let _ = stdin.flush().await;
            }
        }
        drop(stdin);
        drop(stdout);

        let worker = self.index;
        tokio::select! {
            _ = self.kill.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                warn!(worker, "worker process killed");
            }
            status = child.wait() => match status {
                Ok(status) => debug!(worker, %status, "worker process exited"),
                Err(e) => warn!(worker, error = %e, "failed to wait for worker process"),
            },
        }
    }
}
