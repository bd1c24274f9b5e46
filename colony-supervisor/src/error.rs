//! Error surface for the process supervisor.

use std::path::PathBuf;

use colony_core::{StoreError, WorkerName};
use thiserror::Error;

/// Errors from spawn/stop/reclaim operations.
///
/// Graceful-shutdown timeouts are deliberately NOT represented here:
/// they are escalated to a forced kill and logged, never propagated as a
/// hard failure of `stop`.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `WorkerSpec.name` was empty.
    #[error("worker name must not be empty")]
    EmptyName,

    /// `start` was called for a name with a live process record.
    #[error("worker '{name}' is already running (pid {pid})")]
    AlreadyRunning { name: WorkerName, pid: u32 },

    /// The command could not be executed (not found, permission denied).
    /// Never retried automatically; no record is left behind.
    #[error("failed to spawn worker '{name}': {source}")]
    SpawnFailed {
        name: WorkerName,
        #[source]
        source: std::io::Error,
    },

    /// Record store failure — fatal to the controller (spec-level
    /// invariants all depend on the store being trustworthy).
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// I/O failure outside the store (log sink creation, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
