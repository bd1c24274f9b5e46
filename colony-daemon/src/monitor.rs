//! The liveness sweep: fold OS probes (and optional heartbeats) into the
//! per-worker health state machine and drive budgeted restarts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colony_core::{Action, HealthState, Observation, RestartPolicy, WorkerName, WorkerSpec};
use colony_supervisor::{Liveness, Supervisor};

/// Optional application-level liveness: when a worker reports heartbeats
/// through some side channel, the monitor folds their freshness into the
/// sweep instead of relying on process existence alone.
pub trait HeartbeatSource: Send + Sync {
    fn last_heartbeat(&self, name: &WorkerName) -> Option<DateTime<Utc>>;
}

/// What one sweep did, for logging and diagnostics.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub restarted: Vec<WorkerName>,
    /// Workers sitting in `Crashed` with no restart budget left.
    pub exhausted: Vec<WorkerName>,
}

/// The Health Monitor.
///
/// Holds the health state for every tracked worker. Single-writer like
/// the supervisor: the orchestrator facade serializes all access.
pub struct HealthMonitor {
    states: HashMap<WorkerName, HealthState>,
    policy: RestartPolicy,
    failure_threshold: u32,
    heartbeat_grace: Duration,
    heartbeats: Option<Arc<dyn HeartbeatSource>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("states", &self.states)
            .field("policy", &self.policy)
            .field("failure_threshold", &self.failure_threshold)
            .field("heartbeat_grace", &self.heartbeat_grace)
            .field("heartbeats", &self.heartbeats.is_some())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        policy: RestartPolicy,
        failure_threshold: u32,
        heartbeat_grace: Duration,
        heartbeats: Option<Arc<dyn HeartbeatSource>>,
    ) -> Self {
        Self {
            states: HashMap::new(),
            policy,
            failure_threshold,
            heartbeat_grace,
            heartbeats,
        }
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Begin tracking a worker in `Starting`; an already-tracked name is
    /// reset (a fresh instance gets a fresh restart budget).
    pub fn track(&mut self, name: WorkerName, now: DateTime<Utc>) {
        self.states.insert(name, HealthState::new(now));
    }

    /// Stop tracking a worker (explicit stop: the `Stopped` terminal
    /// state has no further transitions worth holding on to).
    pub fn forget(&mut self, name: &WorkerName) {
        self.states.remove(name);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn state(&self, name: &WorkerName) -> Option<&HealthState> {
        self.states.get(name)
    }

    pub fn states(&self) -> &HashMap<WorkerName, HealthState> {
        &self.states
    }

    /// Workers currently `Crashed` with no restart budget left.
    pub fn exhausted(&self) -> Vec<(WorkerName, HealthState)> {
        let mut out: Vec<_> = self
            .states
            .iter()
            .filter(|(_, state)| self.policy.decide(state) == Action::GiveUp)
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// One liveness sweep over every tracked record.
    ///
    /// For each worker: probe the OS (and heartbeat freshness when a
    /// source is wired in), fold the observation into the state machine,
    /// then let the restart policy decide recovery. Restarts respect the
    /// exponential backoff clock; a worker whose budget is spent stays
    /// `Crashed` and is only surfaced, never restarted.
    pub async fn sweep(
        &mut self,
        supervisor: &mut Supervisor,
        specs: &BTreeMap<WorkerName, WorkerSpec>,
        now: DateTime<Utc>,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut names: std::collections::BTreeSet<WorkerName> =
            supervisor.store().names().into_iter().collect();

        // Records can disappear underneath us (operator stop raced the
        // sweep); their states go with them. Crashed states are kept even
        // without a record: the restart budget must survive a failed
        // respawn, which reclaims the stale record before erroring.
        self.states.retain(|name, state| {
            names.contains(name) || state.status == colony_core::HealthStatus::Crashed
        });
        names.extend(self.states.keys().cloned());

        for name in names {
            let state = self
                .states
                .entry(name.clone())
                .or_insert_with(|| HealthState::new(now));

            let observation = match supervisor.probe(&name) {
                Liveness::Running => heartbeat_observation(
                    self.heartbeats.as_deref(),
                    &name,
                    self.heartbeat_grace,
                    now,
                ),
                Liveness::Exited => Observation::ProcessExited,
                // Crashed worker whose record was already reclaimed.
                Liveness::Untracked => Observation::ProcessExited,
            };

            let before = state.status;
            if state.observe(observation, self.failure_threshold, now) {
                tracing::info!(
                    worker = %name,
                    from = ?before,
                    to = ?state.status,
                    "health transition",
                );
            }

            match self.policy.decide(state) {
                Action::NoAction => {}
                Action::GiveUp => {
                    if state.restart_count == self.policy.max_restarts
                        && observation == Observation::ProcessExited
                        && before != state.status
                    {
                        // Log once, at the crash that found the budget empty.
                        tracing::error!(
                            worker = %name,
                            restarts = state.restart_count,
                            "restart budget exhausted; leaving worker crashed",
                        );
                    }
                    outcome.exhausted.push(name.clone());
                }
                Action::Retry { after } => {
                    // An unrepresentable deadline means "never due".
                    let due = chrono::Duration::from_std(after)
                        .ok()
                        .and_then(|wait| state.last_transition_at.checked_add_signed(wait));
                    let Some(due) = due else { continue };
                    if now < due {
                        continue;
                    }
                    let Some(spec) = specs.get(&name) else {
                        tracing::warn!(
                            worker = %name,
                            "crashed worker has no spec on file; cannot restart",
                        );
                        continue;
                    };
                    match supervisor.start(spec).await {
                        Ok(record) => {
                            state.mark_restarted(now);
                            tracing::info!(
                                worker = %name,
                                pid = record.pid,
                                restarts = state.restart_count,
                                "worker restarted after crash",
                            );
                            outcome.restarted.push(name.clone());
                        }
                        Err(err) => {
                            // A spawn that fails burns budget too, so a
                            // broken command line cannot retry forever.
                            state.mark_restart_failed(now);
                            tracing::warn!(
                                worker = %name,
                                error = %err,
                                restarts = state.restart_count,
                                "restart attempt failed",
                            );
                        }
                    }
                }
            }
        }

        outcome
    }
}

fn heartbeat_observation(
    heartbeats: Option<&dyn HeartbeatSource>,
    name: &WorkerName,
    grace: Duration,
    now: DateTime<Utc>,
) -> Observation {
    let Some(source) = heartbeats else {
        return Observation::CheckPassed;
    };
    match source.last_heartbeat(name) {
        Some(seen)
            if now.signed_duration_since(seen)
                <= chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX) =>
        {
            Observation::CheckPassed
        }
        Some(_) => Observation::CheckFailed,
        // Not reporting yet: process liveness already passed, and a
        // worker that never heartbeats is monitored on liveness alone.
        None => Observation::CheckPassed,
    }
}
