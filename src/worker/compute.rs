//! # CPU-bound computation of one work unit.
//!
//! A [`Workload`] performs one opaque step at a time; [`compute`] drives it over
//! all `steps_total` steps, batching progress and converting every fault into a
//! failed [`ResultEvent`].
//!
//! ## Flow
//! ```text
//! for step in 1..=steps_total {
//!   ├─► workload.step(unit, step)   (panic caught)
//!   │       ├─ Ok(v)  ─► aggregate += v (checked)
//!   │       └─ Err/panic/overflow ─► return ResultEvent::failed
//!   └─► if step % interval == 0 || step == steps_total ─► on_progress(ProgressEvent)
//! }
//! return ResultEvent::completed(aggregate)
//! ```
//!
//! ## Rules
//! - Returns **exactly one** result per unit; faults never escape as panics.
//! - `interval` is clamped to at least 1.
//! - The only early exit without a result is a closed progress channel, which
//!   means shutdown is under way and nobody listens anymore.

use std::hint::black_box;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{ChannelClosed, ComputeError};
use crate::events::{ProgressEvent, ResultEvent, WorkUnit};

/// Error type a workload step may return.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// # Opaque CPU-bound work.
///
/// Each call performs one logical step of `unit` and returns that step's
/// contribution to the task aggregate.
///
/// # Example
/// ```
/// use procvisor::{StepError, WorkUnit, Workload};
///
/// struct Count;
///
/// impl Workload for Count {
///     fn name(&self) -> &str { "count" }
///
///     fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> {
///         Ok(1)
///     }
/// }
/// ```
pub trait Workload: Send + Sync + 'static {
    /// Human-readable name (for logs).
    fn name(&self) -> &str;

    /// Performs step `step` (1-based) of `unit`.
    fn step(&self, unit: &WorkUnit, step: u64) -> Result<u64, StepError>;
}

/// Default workload: each step adds `Σ x²` for `x` in `1..span`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareSum {
    /// Upper bound (exclusive) of the inner sum.
    pub span: u64,
}

impl Default for SquareSum {
    fn default() -> Self {
        Self { span: 10_000 }
    }
}

impl Workload for SquareSum {
    fn name(&self) -> &str {
        "square_sum"
    }

    fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> {
        (1..self.span)
            .try_fold(0u64, |acc, x| {
                let x = black_box(x);
                x.checked_mul(x).and_then(|sq| acc.checked_add(sq))
            })
            .ok_or_else(|| format!("sum of squares below {} overflows u64", self.span).into())
    }
}

/// Runs `unit` to completion under `workload`.
///
/// `on_progress` receives each batched progress event; if it reports the
/// channel closed, computation stops and `Err(ChannelClosed)` is returned.
pub fn compute<W, F>(
    workload: &W,
    unit: &WorkUnit,
    interval: u64,
    mut on_progress: F,
) -> Result<ResultEvent, ChannelClosed>
where
    W: Workload + ?Sized,
    F: FnMut(ProgressEvent) -> Result<(), ChannelClosed>,
{
    let interval = interval.max(1);
    let mut aggregate: u64 = 0;

    for step in 1..=unit.steps_total {
        let value = match run_step(workload, unit, step) {
            Ok(v) => v,
            Err(err) => return Ok(ResultEvent::failed(unit.task_id.clone(), &err)),
        };
        aggregate = match aggregate.checked_add(value) {
            Some(sum) => sum,
            None => {
                let err = ComputeError::Overflow { step };
                return Ok(ResultEvent::failed(unit.task_id.clone(), &err));
            }
        };

        if step % interval == 0 || step == unit.steps_total {
            on_progress(ProgressEvent::at_step(unit, step, aggregate))?;
        }
    }

    Ok(ResultEvent::completed(unit.task_id.clone(), aggregate))
}

fn run_step<W: Workload + ?Sized>(
    workload: &W,
    unit: &WorkUnit,
    step: u64,
) -> Result<u64, ComputeError> {
    match catch_unwind(AssertUnwindSafe(|| workload.step(unit, step))) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(ComputeError::Failed {
            step,
            error: e.to_string(),
        }),
        Err(payload) => Err(ComputeError::Panicked {
            info: panic_message(payload.as_ref()),
        }),
    }
}

/// Renders a panic payload as text.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Outcome, TaskId};

    struct Ones;

    impl Workload for Ones {
        fn name(&self) -> &str {
            "ones"
        }
        fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> {
            Ok(1)
        }
    }

    struct FailAt(u64);

    impl Workload for FailAt {
        fn name(&self) -> &str {
            "fail_at"
        }
        fn step(&self, _unit: &WorkUnit, step: u64) -> Result<u64, StepError> {
            if step == self.0 {
                return Err("disk on fire".into());
            }
            Ok(1)
        }
    }

    struct PanicAt(u64);

    impl Workload for PanicAt {
        fn name(&self) -> &str {
            "panic_at"
        }
        fn step(&self, _unit: &WorkUnit, step: u64) -> Result<u64, StepError> {
            if step == self.0 {
                panic!("step {step} exploded");
            }
            Ok(1)
        }
    }

    fn run<W: Workload>(w: &W, steps: u64, interval: u64) -> (Vec<ProgressEvent>, ResultEvent) {
        let unit = WorkUnit::new(TaskId::from("t"), steps);
        let mut seen = Vec::new();
        let res = compute(w, &unit, interval, |ev| {
            seen.push(ev);
            Ok(())
        })
        .unwrap();
        (seen, res)
    }

    #[test]
    fn test_hundred_steps_interval_ten_emits_ten_events() {
        let (events, res) = run(&Ones, 100, 10);

        let steps: Vec<u64> = events.iter().map(|e| e.step_index).collect();
        assert_eq!(steps, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(events.last().map(|e| e.percent_complete), Some(100.0));
        assert_eq!(res, ResultEvent::completed(TaskId::from("t"), 100));
    }

    #[test]
    fn test_final_step_always_reported() {
        let (events, _) = run(&Ones, 25, 10);
        let steps: Vec<u64> = events.iter().map(|e| e.step_index).collect();
        assert_eq!(steps, vec![10, 20, 25]);

        let (events, _) = run(&Ones, 3, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent_complete, 100.0);
    }

    #[test]
    fn test_zero_interval_reports_every_step() {
        let (events, _) = run(&Ones, 4, 0);
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_step_error_becomes_failed_result() {
        let (events, res) = run(&FailAt(15), 100, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(res.status, Outcome::Failed);
        let failure = res.error.unwrap();
        assert_eq!(failure.label, "computation_failed");
        assert!(failure.message.contains("disk on fire"));
    }

    #[test]
    fn test_panic_becomes_failed_result() {
        let (_, res) = run(&PanicAt(2), 5, 1);
        assert_eq!(res.status, Outcome::Failed);
        let failure = res.error.unwrap();
        assert_eq!(failure.label, "computation_panicked");
        assert!(failure.message.contains("step 2 exploded"));
    }

    #[test]
    fn test_aggregate_overflow_fails_task() {
        struct Huge;
        impl Workload for Huge {
            fn name(&self) -> &str {
                "huge"
            }
            fn step(&self, _unit: &WorkUnit, _step: u64) -> Result<u64, StepError> {
                Ok(u64::MAX / 2 + 1)
            }
        }

        let (_, res) = run(&Huge, 3, 1);
        assert_eq!(res.error.map(|f| f.label).as_deref(), Some("computation_overflow"));
    }

    #[test]
    fn test_closed_progress_channel_stops_computation() {
        let unit = WorkUnit::new(TaskId::from("t"), 50);
        let res = compute(&Ones, &unit, 10, |_| Err(ChannelClosed));
        assert_eq!(res, Err(ChannelClosed));
    }

    #[test]
    fn test_square_sum_step_value() {
        let unit = WorkUnit::new(TaskId::from("t"), 1);
        let w = SquareSum { span: 4 };
        // 1 + 4 + 9
        assert_eq!(w.step(&unit, 1).unwrap(), 14);
        assert_eq!(SquareSum::default().step(&unit, 1).unwrap(), 333_283_335_000);
    }
}
