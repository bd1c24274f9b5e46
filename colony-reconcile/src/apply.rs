//! Plan application through the supervisor.

use std::fmt;
use std::time::Duration;

use colony_core::WorkerName;
use colony_supervisor::{Supervisor, SupervisorError};
use thiserror::Error;

use crate::plan::ReconciliationPlan;

/// Which plan list an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOp {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for PlanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOp::Start => write!(f, "start"),
            PlanOp::Stop => write!(f, "stop"),
            PlanOp::Restart => write!(f, "restart"),
        }
    }
}

/// A single failed plan item.
#[derive(Debug, Error)]
#[error("{op} of worker '{name}' failed: {source}")]
pub struct ApplyError {
    pub name: WorkerName,
    pub op: PlanOp,
    #[source]
    pub source: SupervisorError,
}

/// Outcome of one plan application. Individual failures never roll back
/// successfully-applied items; the next reconciliation recomputes from
/// current store state and retries only the outstanding difference.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub started: Vec<WorkerName>,
    pub stopped: Vec<WorkerName>,
    pub restarted: Vec<WorkerName>,
    pub errors: Vec<ApplyError>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Execute a plan: stops first, then restarts (stop-then-start under the
/// same name), then starts. Stopping obsolete workers before starting
/// replacements avoids two processes briefly claiming the same external
/// lease.
pub async fn apply(
    plan: &ReconciliationPlan,
    supervisor: &mut Supervisor,
    stop_timeout: Duration,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for name in &plan.to_stop {
        match supervisor.stop(name, stop_timeout).await {
            Ok(()) => report.stopped.push(name.clone()),
            Err(source) => report.errors.push(ApplyError {
                name: name.clone(),
                op: PlanOp::Stop,
                source,
            }),
        }
    }

    for spec in &plan.to_restart {
        if let Err(source) = supervisor.stop(&spec.name, stop_timeout).await {
            report.errors.push(ApplyError {
                name: spec.name.clone(),
                op: PlanOp::Restart,
                source,
            });
            // Old instance may still hold the name; starting a second
            // one on top of it would be worse than skipping.
            continue;
        }
        match supervisor.start(spec).await {
            Ok(_record) => report.restarted.push(spec.name.clone()),
            Err(SupervisorError::AlreadyRunning { name, pid }) => {
                tracing::debug!(worker = %name, pid, "restart raced a live instance; leaving it");
                report.restarted.push(name);
            }
            Err(source) => report.errors.push(ApplyError {
                name: spec.name.clone(),
                op: PlanOp::Restart,
                source,
            }),
        }
    }

    for spec in &plan.to_start {
        match supervisor.start(spec).await {
            Ok(_record) => report.started.push(spec.name.clone()),
            // The plan is recomputed from store state, so a live
            // duplicate means someone started it between compute and
            // apply — the desired outcome already holds.
            Err(SupervisorError::AlreadyRunning { name, pid }) => {
                tracing::debug!(worker = %name, pid, "already running; treating start as no-op");
                report.started.push(name);
            }
            Err(source) => report.errors.push(ApplyError {
                name: spec.name.clone(),
                op: PlanOp::Start,
                source,
            }),
        }
    }

    if !report.errors.is_empty() {
        tracing::warn!(
            failed = report.errors.len(),
            applied = report.started.len() + report.stopped.len() + report.restarted.len(),
            "reconciliation applied with partial failures",
        );
    }

    report
}
