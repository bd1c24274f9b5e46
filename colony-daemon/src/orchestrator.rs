//! The orchestrator facade: one mutex-guarded object owning the
//! supervisor, the health monitor, and the last-applied desired set.
//!
//! Every mutating path — socket commands, the sweep loop, the reconcile
//! queue — goes through `Arc<Mutex<Orchestrator>>`, so the record store
//! and health states only ever have a single writer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colony_core::{HealthState, ProcessRecord, WorkerName, WorkerSpec};
use colony_reconcile::{apply, compute, PlanOp, ReconciliationPlan};
use colony_supervisor::{Supervisor, SupervisorError};
use serde::Serialize;

use crate::error::DaemonError;
use crate::monitor::{HealthMonitor, SweepOutcome};

/// One worker as reported over the socket: the persisted record joined
/// with its health state.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    pub name: WorkerName,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command: Vec<String>,
    pub log_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthState>,
}

/// Outcome of one reconciliation pass, shaped for the socket protocol.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub source: String,
    pub planned: usize,
    pub started: Vec<WorkerName>,
    pub stopped: Vec<WorkerName>,
    pub restarted: Vec<WorkerName>,
    pub errors: Vec<String>,
    pub clean: bool,
}

/// A crashed worker whose restart budget is spent.
#[derive(Debug, Clone, Serialize)]
pub struct ExhaustedWorker {
    pub name: WorkerName,
    pub restart_count: u32,
    pub crashed_at: DateTime<Utc>,
}

/// The diagnostics surface ("doctor").
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub daemon_started_at: DateTime<Utc>,
    pub tracked_workers: usize,
    /// Records dropped at startup because their process was gone.
    pub reclaimed_at_startup: Vec<WorkerName>,
    pub exhausted: Vec<ExhaustedWorker>,
    /// Seconds since the last reconciliation that applied without errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_clean_reconcile_age_secs: Option<i64>,
}

#[derive(Debug)]
pub struct Orchestrator {
    supervisor: Supervisor,
    monitor: HealthMonitor,
    /// Specs of the last-applied desired set, keyed by name. Source of
    /// truth for restart-on-crash and for change detection on reconcile.
    specs: BTreeMap<WorkerName, WorkerSpec>,
    stop_timeout: Duration,
    started_at: DateTime<Utc>,
    reclaimed_at_startup: Vec<WorkerName>,
    last_clean_reconcile_at: Option<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(supervisor: Supervisor, monitor: HealthMonitor, stop_timeout: Duration) -> Self {
        Self {
            supervisor,
            monitor,
            specs: BTreeMap::new(),
            stop_timeout,
            started_at: Utc::now(),
            reclaimed_at_startup: Vec::new(),
            last_clean_reconcile_at: None,
        }
    }

    /// Startup pass over records persisted by a previous daemon run:
    /// drop the ones whose process is gone, adopt the survivors into
    /// health tracking.
    pub fn bootstrap(&mut self) -> Result<(), DaemonError> {
        self.reclaimed_at_startup = self.supervisor.reclaim()?;
        let now = Utc::now();
        for name in self.supervisor.store().names() {
            self.monitor.track(name, now);
        }
        Ok(())
    }

    pub fn tracked_names(&self) -> Vec<WorkerName> {
        self.supervisor.store().names()
    }

    pub fn list(&self) -> Vec<WorkerView> {
        let mut views: Vec<WorkerView> = self
            .supervisor
            .store()
            .snapshot()
            .values()
            .map(|record| self.view_of(record))
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    pub fn worker(&self, name: &WorkerName) -> Option<WorkerView> {
        self.supervisor
            .store()
            .get(name)
            .map(|record| self.view_of(record))
    }

    fn view_of(&self, record: &ProcessRecord) -> WorkerView {
        WorkerView {
            name: record.name.clone(),
            pid: record.pid,
            started_at: record.started_at,
            command: record.command.clone(),
            log_path: record.log_path.clone(),
            health: self.monitor.state(&record.name).cloned(),
        }
    }

    /// Start one worker from the current configuration by name.
    pub async fn start(&mut self, name: &WorkerName) -> Result<ProcessRecord, DaemonError> {
        let Some(spec) = self.specs.get(name).cloned() else {
            return Err(DaemonError::UnknownWorker { name: name.clone() });
        };
        let record = self.supervisor.start(&spec).await?;
        self.monitor.track(name.clone(), Utc::now());
        Ok(record)
    }

    /// Stop one worker. Idempotent: an untracked name is quiet success.
    pub async fn stop(&mut self, name: &WorkerName) -> Result<(), DaemonError> {
        self.supervisor.stop(name, self.stop_timeout).await?;
        self.monitor.forget(name);
        Ok(())
    }

    /// Stop every tracked worker, collecting per-worker failures.
    pub async fn stop_all(&mut self) -> Vec<(WorkerName, SupervisorError)> {
        let errors = self.supervisor.stop_all(self.stop_timeout).await;
        self.monitor.clear();
        errors
    }

    /// Shutdown fallback once the graceful stop budget is spent: SIGKILL
    /// every remaining process group without waiting for confirmation.
    pub fn force_kill_all(&mut self) -> Vec<(WorkerName, SupervisorError)> {
        let errors = self.supervisor.force_kill_all();
        self.monitor.clear();
        errors
    }

    /// Reconcile the running set to `desired`: plan, apply, then adopt
    /// `desired` as the configuration on file.
    pub async fn reconcile(
        &mut self,
        desired: Vec<WorkerSpec>,
        source: &'static str,
    ) -> ReconcileSummary {
        let plan = self.plan_for(&desired);
        if !plan.is_empty() {
            tracing::info!(
                source,
                start = plan.to_start.len(),
                stop = plan.to_stop.len(),
                restart = plan.to_restart.len(),
                "applying reconciliation plan",
            );
        }

        let report = apply(&plan, &mut self.supervisor, self.stop_timeout).await;

        let now = Utc::now();
        // Only workers whose stop actually completed lose their health
        // history; a failed stop leaves the restart budget intact.
        for name in &report.stopped {
            self.monitor.forget(name);
        }
        for name in report.started.iter().chain(report.restarted.iter()) {
            self.monitor.track(name.clone(), now);
        }

        let mut adopted: BTreeMap<WorkerName, WorkerSpec> = desired
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        // A restart that failed never brought the worker onto its new
        // spec; keeping the previous spec on file means the next pass
        // over the same desired set still computes the outstanding
        // difference instead of declaring convergence.
        for err in &report.errors {
            if err.op == PlanOp::Restart {
                if let Some(previous) = self.specs.get(&err.name) {
                    adopted.insert(err.name.clone(), previous.clone());
                }
            }
        }
        self.specs = adopted;
        if report.is_clean() {
            self.last_clean_reconcile_at = Some(now);
        }

        ReconcileSummary {
            source: source.to_string(),
            planned: plan.len(),
            started: report.started,
            stopped: report.stopped,
            restarted: report.restarted,
            errors: report.errors.iter().map(|err| err.to_string()).collect(),
            clean: report.errors.is_empty(),
        }
    }

    fn plan_for(&self, desired: &[WorkerSpec]) -> ReconciliationPlan {
        let running = self.supervisor.store().names().into_iter().collect();
        compute(desired, &running, &self.specs)
    }

    /// One health sweep (called from the monitor loop).
    pub async fn sweep(&mut self) -> SweepOutcome {
        self.monitor
            .sweep(&mut self.supervisor, &self.specs, Utc::now())
            .await
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        let exhausted = self
            .monitor
            .exhausted()
            .into_iter()
            .map(|(name, state)| ExhaustedWorker {
                name,
                restart_count: state.restart_count,
                crashed_at: state.last_transition_at,
            })
            .collect();

        DiagnosticsReport {
            daemon_started_at: self.started_at,
            tracked_workers: self.supervisor.store().len(),
            reclaimed_at_startup: self.reclaimed_at_startup.clone(),
            exhausted,
            last_clean_reconcile_age_secs: self
                .last_clean_reconcile_at
                .map(|at| Utc::now().signed_duration_since(at).num_seconds()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
