//! # colony-reconcile
//!
//! Configuration reconciliation: compute the minimal add/update/remove
//! plan between the tracked worker set and a desired spec set
//! ([`plan::compute`]), then apply it through the supervisor
//! ([`apply::apply`]) with per-item error collection.

pub mod apply;
pub mod plan;

pub use apply::{apply, ApplyError, ApplyReport, PlanOp};
pub use plan::{compute, ReconciliationPlan};
