//! # colony-supervisor
//!
//! Process Supervisor: spawns worker processes into their own process
//! groups, owns their log sinks, tracks them in the record store, and
//! performs graceful-then-forced termination.
//!
//! Call [`Supervisor::start`] / [`Supervisor::stop`] for single workers,
//! [`Supervisor::stop_all`] on controller shutdown, and
//! [`Supervisor::reclaim`] once at startup to drop records orphaned by a
//! previous controller run.

mod error;
mod handle;
mod proc;
mod supervisor;

pub use error::SupervisorError;
pub use handle::{ProcessHandle, SignalKind};
pub use proc::is_pid_alive;
pub use supervisor::{Liveness, Supervisor, KILL_CONFIRM_TIMEOUT};
