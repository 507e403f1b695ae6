//! # FIFO channel connecting the gateway side and the worker side.
//!
//! [`Channel`] is a thin wrapper around [`async_channel`] (multi-producer,
//! multi-consumer) used for the TaskQueue, the ProgressChannel and the ResultChannel.
//!
//! ## Architecture
//! ```text
//! Producers (many):                         Consumers (many):
//!   Gateway  ──┐                        ┌──► worker 1 (pop / pop_blocking)
//!   Supervisor ┼──► Channel<Command> ───┼──► worker 2
//!              │     (FIFO, MPMC)       └──► worker N
//!
//!   worker 1 ──┐
//!   worker N ──┴──► Channel<ProgressEvent> ──► ProgressCollector (try_pop + backoff)
//! ```
//!
//! ## Rules
//! - **Non-blocking push**: [`Channel::push`] never waits; it fails only when the
//!   channel is closed or a bounded channel is full.
//! - **Two waiting styles**: [`Channel::pop`] suspends an async task,
//!   [`Channel::pop_blocking`] parks an OS thread. Both end with [`ChannelClosed`]
//!   once the channel is closed **and** drained.
//! - **Empty is not an error**: [`Channel::try_pop`] returns `Ok(None)` when empty.
//! - **Capacity 0** means unbounded.

use crate::error::{ChannelClosed, PushError};

/// Concurrency-safe FIFO channel.
///
/// Cheap to clone: every clone shares the same queue.
#[derive(Debug)]
pub struct Channel<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
    capacity: Option<usize>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Channel<T> {
    /// Creates a channel; `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx, capacity) = match capacity {
            0 => {
                let (tx, rx) = async_channel::unbounded();
                (tx, rx, None)
            }
            n => {
                let (tx, rx) = async_channel::bounded(n);
                (tx, rx, Some(n))
            }
        };
        Self { tx, rx, capacity }
    }

    /// Creates an unbounded channel.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Pushes without waiting.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            async_channel::TrySendError::Full(t) => PushError::Full(t),
            async_channel::TrySendError::Closed(t) => PushError::Closed(t),
        })
    }

    /// Pushes, suspending while a bounded channel is full.
    pub async fn push_wait(&self, item: T) -> Result<(), ChannelClosed> {
        self.tx.send(item).await.map_err(|_| ChannelClosed)
    }

    /// Pushes from an OS thread, parking it while a bounded channel is full.
    pub fn push_blocking(&self, item: T) -> Result<(), ChannelClosed> {
        self.tx.send_blocking(item).map_err(|_| ChannelClosed)
    }

    /// Waits (async) until an item is available or the channel is closed and empty.
    pub async fn pop(&self) -> Result<T, ChannelClosed> {
        self.rx.recv().await.map_err(|_| ChannelClosed)
    }

    /// Parks the calling OS thread until an item is available or the channel is
    /// closed and empty.
    pub fn pop_blocking(&self) -> Result<T, ChannelClosed> {
        self.rx.recv_blocking().map_err(|_| ChannelClosed)
    }

    /// Returns immediately: `Ok(Some)` with an item, `Ok(None)` when empty.
    pub fn try_pop(&self) -> Result<Option<T>, ChannelClosed> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(async_channel::TryRecvError::Empty) => Ok(None),
            Err(async_channel::TryRecvError::Closed) => Err(ChannelClosed),
        }
    }

    /// Closes the channel. Items already queued can still be popped.
    ///
    /// Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// True if a bounded channel is at capacity (never for unbounded ones).
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Configured capacity; `None` for unbounded channels.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// The three channels that are the only link between gateway and workers.
#[derive(Clone, Debug)]
pub struct Channels {
    /// Work units and termination sentinels.
    pub tasks: Channel<super::Command>,
    /// Progress events from all workers.
    pub progress: Channel<super::ProgressEvent>,
    /// Terminal events from all workers.
    pub results: Channel<super::ResultEvent>,
}

impl Channels {
    /// Creates the channel set; `queue_capacity == 0` keeps the TaskQueue unbounded.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            tasks: Channel::new(queue_capacity),
            progress: Channel::unbounded(),
            results: Channel::unbounded(),
        }
    }

    /// Closes all three channels.
    pub fn close_all(&self) {
        self.tasks.close();
        self.progress.close();
        self.results.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_pop_distinguishes_empty_from_closed() {
        let ch: Channel<u32> = Channel::unbounded();
        assert_eq!(ch.try_pop(), Ok(None));

        ch.push(1).unwrap();
        ch.close();
        // Queued items survive close.
        assert_eq!(ch.try_pop(), Ok(Some(1)));
        assert_eq!(ch.try_pop(), Err(ChannelClosed));
    }

    #[test]
    fn test_bounded_push_reports_full() {
        let ch: Channel<u32> = Channel::new(1);
        assert_eq!(ch.capacity(), Some(1));
        ch.push(1).unwrap();
        assert!(ch.is_full());
        assert_eq!(ch.push(2), Err(PushError::Full(2)));
    }

    #[test]
    fn test_push_after_close_fails() {
        let ch: Channel<u32> = Channel::unbounded();
        ch.close();
        assert_eq!(ch.push(5), Err(PushError::Closed(5)));
        assert_eq!(ch.push_blocking(5), Err(ChannelClosed));
    }

    #[test]
    fn test_pop_blocking_across_threads_preserves_fifo() {
        let ch: Channel<u32> = Channel::unbounded();
        let producer = ch.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push_blocking(i).unwrap();
            }
            producer.close();
        });

        let mut seen = Vec::new();
        while let Ok(v) = ch.pop_blocking() {
            seen.push(v);
        }
        handle.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let ch: Channel<&'static str> = Channel::unbounded();
        let consumer = ch.clone();
        let waiter = tokio::spawn(async move { consumer.pop().await });
        tokio::task::yield_now().await;
        ch.push("hello").unwrap();
        assert_eq!(waiter.await.unwrap(), Ok("hello"));
    }
}
