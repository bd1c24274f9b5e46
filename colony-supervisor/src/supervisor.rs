//! Spawn, track, and terminate worker processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use colony_core::{ProcessRecord, RecordStore, StoreError, WorkerName, WorkerSpec};
use tokio::process::Command;

use crate::error::{io_err, SupervisorError};
use crate::handle::{ProcessHandle, SignalKind};

/// Bounded wait for OS exit confirmation after SIGKILL. Past this the
/// supervisor proceeds regardless so a misbehaving child can never wedge
/// the controller.
pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// OS liveness of a tracked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Record present and the process is alive.
    Running,
    /// Record present but the process is gone (crashed or orphaned).
    Exited,
    /// No record for this name.
    Untracked,
}

/// The Process Supervisor.
///
/// Owns the record store, the per-worker log sinks, and the process
/// handles. Not internally synchronized: the orchestrator facade
/// serializes all access behind one mutex.
#[derive(Debug)]
pub struct Supervisor {
    store: RecordStore,
    logs_dir: PathBuf,
    handles: HashMap<WorkerName, ProcessHandle>,
}

impl Supervisor {
    pub fn new(store: RecordStore, logs_dir: PathBuf) -> Self {
        Self {
            store,
            logs_dir,
            handles: HashMap::new(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Deterministic log sink path for a worker, so external tooling can
    /// locate logs without querying the controller.
    pub fn log_path(&self, name: &WorkerName) -> PathBuf {
        self.logs_dir.join(format!("{name}.log"))
    }

    /// Spawn a worker from its spec.
    ///
    /// The process lands in its own process group, with stdout+stderr
    /// appended to the worker's log sink. The record is durably persisted
    /// before this returns. A stale record for the same name (process
    /// already dead) is reclaimed inline; a live one is `AlreadyRunning`.
    pub async fn start(&mut self, spec: &WorkerSpec) -> Result<ProcessRecord, SupervisorError> {
        if spec.name.0.is_empty() {
            return Err(SupervisorError::EmptyName);
        }

        if let Some(existing) = self.store.get(&spec.name).cloned() {
            if self.probe(&spec.name) == Liveness::Running {
                return Err(SupervisorError::AlreadyRunning {
                    name: spec.name.clone(),
                    pid: existing.pid,
                });
            }
            tracing::info!(
                worker = %spec.name,
                pid = existing.pid,
                "reclaiming stale record before start",
            );
            self.handles.remove(&spec.name);
            self.store.remove(&spec.name)?;
        }

        let log_path = self.log_path(&spec.name);
        let log_file = self.open_log_sink(&log_path)?;
        let log_file_err = log_file
            .try_clone()
            .map_err(|err| io_err(&log_path, err))?;

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));
        // Own process group so the worker and any children it spawns can
        // be signalled as a unit.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            name: spec.name.clone(),
            source,
        })?;
        let Some(pid) = child.id() else {
            return Err(SupervisorError::SpawnFailed {
                name: spec.name.clone(),
                source: std::io::Error::other("child exited before its pid could be read"),
            });
        };

        let record = ProcessRecord {
            name: spec.name.clone(),
            pid,
            started_at: Utc::now(),
            command: spec.argv(),
            log_path,
        };

        let mut handle = ProcessHandle::owned(pid, child);
        if let Err(err) = self.store.insert(record.clone()) {
            // Cannot track what we cannot persist: take the child back down.
            let _ = handle.signal(SignalKind::Kill);
            let _ = handle.wait_exit(KILL_CONFIRM_TIMEOUT).await;
            return Err(err.into());
        }
        self.handles.insert(spec.name.clone(), handle);

        tracing::info!(worker = %spec.name, pid, "worker started");
        Ok(record)
    }

    /// Stop a worker: graceful signal, bounded wait, forced kill, record
    /// removal. Stopping an untracked name is success (idempotent).
    pub async fn stop(
        &mut self,
        name: &WorkerName,
        timeout: Duration,
    ) -> Result<(), SupervisorError> {
        let Some(record) = self.store.get(name).cloned() else {
            return Ok(());
        };

        let handle = self
            .handles
            .remove(name)
            .unwrap_or_else(|| ProcessHandle::reclaimed(record.pid));

        terminate(handle, name.clone(), timeout).await;

        self.store.remove(name)?;
        tracing::info!(worker = %name, pid = record.pid, "worker stopped");
        Ok(())
    }

    /// Stop every tracked worker concurrently under the same timeout
    /// budget, collecting per-worker errors — one stuck worker never
    /// prevents the rest from shutting down.
    pub async fn stop_all(&mut self, timeout: Duration) -> Vec<(WorkerName, SupervisorError)> {
        let mut tasks = Vec::new();
        for name in self.store.names() {
            let Some(record) = self.store.get(&name).cloned() else {
                continue;
            };
            let handle = self
                .handles
                .remove(&name)
                .unwrap_or_else(|| ProcessHandle::reclaimed(record.pid));
            tasks.push(tokio::spawn(async move {
                terminate(handle, name.clone(), timeout).await;
                name
            }));
        }

        let mut errors = Vec::new();
        for task in tasks {
            match task.await {
                Ok(name) => {
                    if let Err(err) = self.store.remove(&name) {
                        errors.push((name, SupervisorError::from(err)));
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "stop task join failure");
                }
            }
        }
        errors
    }

    /// Last-resort shutdown path: deliver SIGKILL to every tracked
    /// process group without waiting for exit confirmation, then drop
    /// the records. Called once the graceful stop budget is already
    /// spent and the controller must exit without leaving workers
    /// behind.
    pub fn force_kill_all(&mut self) -> Vec<(WorkerName, SupervisorError)> {
        let mut errors = Vec::new();
        for name in self.store.names() {
            let Some(record) = self.store.get(&name).cloned() else {
                continue;
            };
            let handle = self
                .handles
                .remove(&name)
                .unwrap_or_else(|| ProcessHandle::reclaimed(record.pid));
            match handle.signal(SignalKind::Kill) {
                Ok(()) => {
                    tracing::warn!(worker = %name, pid = record.pid, "worker force-killed at shutdown")
                }
                Err(err) => {
                    tracing::warn!(worker = %name, pid = record.pid, error = %err, "failed to deliver SIGKILL")
                }
            }
            if let Err(err) = self.store.remove(&name) {
                errors.push((name, SupervisorError::from(err)));
            }
        }
        errors
    }

    /// OS liveness reconciled against the stored record. A record whose
    /// process is gone reports `Exited`; the record itself is left for
    /// the health monitor / reclaim to clean up.
    pub fn probe(&mut self, name: &WorkerName) -> Liveness {
        let Some(record) = self.store.get(name) else {
            return Liveness::Untracked;
        };
        let pid = record.pid;
        let alive = match self.handles.get_mut(name) {
            Some(handle) => handle.is_alive(),
            None => crate::proc::is_pid_alive(pid),
        };
        if alive {
            Liveness::Running
        } else {
            Liveness::Exited
        }
    }

    pub fn is_running(&mut self, name: &WorkerName) -> bool {
        self.probe(name) == Liveness::Running
    }

    /// Startup pass: drop every persisted record whose process is no
    /// longer alive (controller crashed/restarted while workers ran, or
    /// workers exited while the controller was down). Returns the
    /// reclaimed names for the diagnostics surface.
    pub fn reclaim(&mut self) -> Result<Vec<WorkerName>, StoreError> {
        let mut reclaimed = Vec::new();
        for name in self.store.names() {
            if self.probe(&name) == Liveness::Exited {
                let removed = self.store.remove(&name)?;
                if let Some(record) = removed {
                    tracing::info!(
                        worker = %name,
                        pid = record.pid,
                        "reclaimed orphaned process record",
                    );
                }
                reclaimed.push(name);
            }
        }
        Ok(reclaimed)
    }

    fn open_log_sink(&self, log_path: &PathBuf) -> Result<std::fs::File, SupervisorError> {
        if !self.logs_dir.exists() {
            std::fs::create_dir_all(&self.logs_dir).map_err(|err| io_err(&self.logs_dir, err))?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|err| io_err(log_path, err))
    }
}

/// Two-phase termination of one process group. Returns `true` if the OS
/// confirmed exit; `false` means SIGKILL was delivered but confirmation
/// timed out — the caller proceeds regardless.
async fn terminate(mut handle: ProcessHandle, name: WorkerName, timeout: Duration) -> bool {
    if !handle.is_alive() {
        return true;
    }

    if let Err(err) = handle.signal(SignalKind::Terminate) {
        tracing::warn!(worker = %name, error = %err, "failed to deliver SIGTERM");
    }
    if handle.wait_exit(timeout).await {
        tracing::debug!(worker = %name, "worker exited gracefully");
        return true;
    }

    tracing::warn!(
        worker = %name,
        timeout_ms = timeout.as_millis() as u64,
        "graceful shutdown timed out; escalating to SIGKILL",
    );
    if let Err(err) = handle.signal(SignalKind::Kill) {
        tracing::warn!(worker = %name, error = %err, "failed to deliver SIGKILL");
    }
    let confirmed = handle.wait_exit(KILL_CONFIRM_TIMEOUT).await;
    if !confirmed {
        tracing::warn!(
            worker = %name,
            pid = handle.id(),
            "no exit confirmation after SIGKILL; abandoning wait",
        );
    }
    confirmed
}
