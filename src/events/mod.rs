//! Worker boundary: message types, channels and the wire codec.
//!
//! This module groups the **data model** exchanged with workers and the
//! **channels** that carry it. Nothing else is shared between the gateway side
//! and the worker side.
//!
//! ## Contents
//! - [`WorkUnit`], [`Command`], [`ProgressEvent`], [`ResultEvent`], [`WorkerMessage`]
//! - [`Channel`] FIFO wrapper over `async_channel`, [`Channels`] the set of three
//! - [`wire`] JSON-lines codec used on child process pipes
//!
//! ## Quick reference
//! - **TaskQueue producers**: `Gateway::submit`, `Supervisor::shutdown` (sentinels).
//! - **TaskQueue consumers**: worker loops (threads) or process drivers.
//! - **Progress/Result producers**: workers. **Consumers**: the two collectors.

mod channel;
mod message;
pub mod wire;

pub use channel::{Channel, Channels};
pub use message::{
    Command, Failure, Outcome, ProgressEvent, ResultEvent, TaskId, WorkUnit, WorkerMessage,
};
