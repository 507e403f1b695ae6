//! # Collectors: drain worker events into the registry.
//!
//! Two independent cooperative tasks share one loop shape:
//!
//! ```text
//! loop {
//!   try_pop()
//!     ├─ Ok(Some(ev)) ─► registry.apply_*(ev) ─► yield_now ─► loop
//!     ├─ Ok(None)     ─► select! { sleep(backoff), token.cancelled() ─► stop }
//!     └─ Err(closed)  ─► stop
//! }
//! ```
//!
//! ## Rules
//! - Never blocks the scheduler: the only suspension points are `yield_now` and
//!   the backoff sleep, so request handling is delayed by at most one event.
//! - On cancellation the loop stops at its next suspension point; events still
//!   queued are discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{Channel, ProgressEvent, ResultEvent};
use crate::registry::{Applied, TaskRegistry};

/// Starts the ProgressCollector.
pub(crate) fn spawn_progress_collector(
    channel: Channel<ProgressEvent>,
    registry: Arc<TaskRegistry>,
    backoff: Duration,
    token: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(collect("progress", channel, backoff, token, move |ev| {
        let registry = Arc::clone(&registry);
        async move { registry.apply_progress(&ev).await }
    }))
}

/// Starts the ResultCollector.
pub(crate) fn spawn_result_collector(
    channel: Channel<ResultEvent>,
    registry: Arc<TaskRegistry>,
    backoff: Duration,
    token: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(collect("result", channel, backoff, token, move |ev| {
        let registry = Arc::clone(&registry);
        async move { registry.apply_result(&ev).await }
    }))
}

/// Poll-with-backoff loop. Returns the number of events merged.
async fn collect<T, F, Fut>(
    name: &'static str,
    channel: Channel<T>,
    backoff: Duration,
    token: CancellationToken,
    mut apply: F,
) -> u64
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Applied>,
{
    let mut merged = 0u64;
    let mut dropped = 0u64;

    loop {
        match channel.try_pop() {
            Ok(Some(ev)) => {
                match apply(ev).await {
                    Applied::Applied => merged += 1,
                    _ => dropped += 1,
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::task::yield_now() => {}
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(_) => break,
        }
    }

    debug!(collector = name, merged, dropped, "collector stopped");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TaskId, WorkUnit};
    use crate::registry::{Task, TaskStatus};

    async fn wait_until(registry: &TaskRegistry, id: &TaskId, done: impl Fn(&Task) -> bool) {
        for _ in 0..200 {
            if registry.get(id).await.is_some_and(|t| done(&t)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry did not reach the expected state");
    }

    #[tokio::test]
    async fn test_collectors_merge_into_registry() {
        let registry = Arc::new(TaskRegistry::new());
        let id = TaskId::from("t");
        registry.create(id.clone(), 20).await.unwrap();
        let unit = WorkUnit::new(id.clone(), 20);

        let progress: Channel<ProgressEvent> = Channel::unbounded();
        let results: Channel<ResultEvent> = Channel::unbounded();
        let token = CancellationToken::new();
        let poll = Duration::from_millis(5);
        let p = spawn_progress_collector(progress.clone(), registry.clone(), poll, token.clone());
        let r = spawn_result_collector(results.clone(), registry.clone(), poll, token.clone());

        progress.push(ProgressEvent::at_step(&unit, 10, 1)).unwrap();
        progress.push(ProgressEvent::at_step(&unit, 20, 2)).unwrap();
        wait_until(&registry, &id, |t| t.partial_history.len() == 2).await;

        results.push(ResultEvent::completed(id.clone(), 2)).unwrap();
        wait_until(&registry, &id, |t| t.is_terminal()).await;
        token.cancel();
        assert_eq!(p.await.unwrap(), 2);
        assert_eq!(r.await.unwrap(), 1);

        let task = registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.partial_history.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_collector_discards_leftovers() {
        let registry = Arc::new(TaskRegistry::new());
        let progress: Channel<ProgressEvent> = Channel::unbounded();
        let token = CancellationToken::new();
        token.cancel();

        let unit = WorkUnit::new(TaskId::from("x"), 1);
        progress.push(ProgressEvent::at_step(&unit, 1, 1)).unwrap();
        progress.push(ProgressEvent::at_step(&unit, 1, 1)).unwrap();

        let handle =
            spawn_progress_collector(progress.clone(), registry, Duration::from_secs(60), token);
        handle.await.unwrap();
        // At most the first event is consumed before the cancelled token is observed.
        assert!(progress.len() >= 1);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_collector() {
        let results: Channel<ResultEvent> = Channel::unbounded();
        results.close();
        let handle = spawn_result_collector(
            results,
            Arc::new(TaskRegistry::new()),
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        assert_eq!(handle.await.unwrap(), 0);
    }
}
