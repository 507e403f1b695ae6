//! Respawn policies for worker processes.
//!
//! ## Contents
//! - [`BackoffPolicy`] how respawn delays evolve over a crash streak (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so simultaneous crashes do not restart in lockstep
//!
//! ## Quick wiring
//! ```text
//! Config { respawn: BackoffPolicy, .. }
//!      └─► worker::process driver uses:
//!           - respawn.next(streak) before starting a replacement child
//!           - streak resets after the next completed unit
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
