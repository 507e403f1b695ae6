//! Runtime core: orchestration and lifecycle.
//!
//! The public API from this module is [`Supervisor`] (built through
//! [`SupervisorBuilder`]) and [`wait_for_shutdown_signal`].
//!
//! Internal modules:
//! - [`supervisor`]: startup, worker pool ownership and the shutdown sequence;
//! - [`collector`]: ProgressCollector / ResultCollector poll-with-backoff loops;
//! - [`builder`]: optional workload and isolation overrides;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod collector;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::Supervisor;
