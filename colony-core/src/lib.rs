//! Colony core library — domain types, health state machine, record store.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`health`] — per-worker health state machine and restart policy
//! - [`store`] — file-backed [`store::RecordStore`]
//! - [`error`] — [`StoreError`]

pub mod error;
pub mod health;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use health::{Action, HealthState, HealthStatus, Observation, RestartPolicy};
pub use store::RecordStore;
pub use types::{ProcessRecord, WorkerName, WorkerSpec};
