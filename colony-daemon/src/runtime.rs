//! The daemon runtime: one tokio task per concern, all wired to a
//! broadcast shutdown channel.
//!
//! Tasks:
//!   - config watcher: `workers.yaml` edits → debounced reconcile jobs
//!   - reconcile processor: serialized, latest-wins application of jobs
//!   - monitor loop: periodic liveness sweeps
//!   - socket server: newline-delimited JSON control protocol
//!   - log rotation
//!   - signal handler (ctrl-c)
//!
//! Every mutating path funnels through one `Arc<Mutex<Orchestrator>>`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::Instant;

use colony_core::{RecordStore, WorkerName, WorkerSpec};
use colony_supervisor::Supervisor;

use crate::config::{self, MonitorSettings};
use crate::error::{io_err, DaemonError};
use crate::monitor::HealthMonitor;
use crate::orchestrator::{Orchestrator, ReconcileSummary};
use crate::paths::{
    colony_root, config_path, daemon_log_path, logs_dir, records_path, run_dir, socket_path,
    worker_logs_dir, DAEMON_LABEL, DEBOUNCE_WINDOW,
};
use crate::protocol::{DaemonRequest, DaemonResponse};

struct ReconcileJob {
    desired: Vec<WorkerSpec>,
    source: &'static str,
    respond_to: oneshot::Sender<Result<ReconcileSummary, String>>,
}

/// Global deadline for the final stop-everything pass on shutdown.
const SHUTDOWN_STOP_BUDGET: Duration = Duration::from_secs(30);

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(home);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&config_path(&home))?;
    let settings = config.monitor.clone();

    let store = RecordStore::open(records_path(&home))?;
    let supervisor = Supervisor::new(store, worker_logs_dir(&home));
    let monitor = HealthMonitor::new(
        settings.restart_policy(),
        settings.failure_threshold,
        settings.heartbeat_grace(),
        None,
    );
    let mut orchestrator = Orchestrator::new(supervisor, monitor, settings.stop_timeout());

    orchestrator.bootstrap()?;
    let startup = orchestrator
        .reconcile(config.workers.clone(), "startup")
        .await;
    tracing::info!(
        planned = startup.planned,
        started = startup.started.len(),
        clean = startup.clean,
        "startup reconciliation done",
    );

    let orchestrator = Arc::new(Mutex::new(orchestrator));

    let (reconcile_tx, reconcile_rx) = mpsc::channel::<ReconcileJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let reconcile_tx = reconcile_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, reconcile_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let result =
                reconcile_processor_task(orchestrator, reconcile_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let monitor_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = orchestrator.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let result = monitor_task(orchestrator, settings, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let orchestrator = orchestrator.clone();
        let reconcile_tx = reconcile_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                orchestrator,
                reconcile_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, monitor_result, socket_result, rotation_result, signal_result) =
        tokio::join!(
            watcher_handle,
            processor_handle,
            monitor_handle,
            socket_handle,
            rotation_handle,
            signal_handle
        );

    // Workers never outlive the controller: graceful stop of the whole
    // colony under one bounded budget, then unconditional SIGKILL for
    // anything still tracked when the budget runs out.
    {
        let mut orch = orchestrator.lock().await;
        match tokio::time::timeout(SHUTDOWN_STOP_BUDGET, orch.stop_all()).await {
            Ok(errors) => {
                for (name, err) in errors {
                    tracing::warn!(worker = %name, error = %err, "error stopping worker at shutdown");
                }
            }
            Err(_) => {
                tracing::warn!("shutdown stop-all exceeded its budget; force-killing remaining workers");
                for (name, err) in orch.force_kill_all() {
                    tracing::warn!(worker = %name, error = %err, "error force-killing worker at shutdown");
                }
            }
        }
    }

    handle_join("watcher", watcher_result)?;
    handle_join("reconcile_processor", processor_result)?;
    handle_join("monitor", monitor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Watch `workers.yaml` and turn debounced edits into reconcile jobs.
/// A config that fails to parse or validate is rejected wholesale; the
/// previously applied set stays in force.
async fn watcher_task(
    home: PathBuf,
    reconcile_tx: mpsc::Sender<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = colony_root(&home);
    let config = config_path(&home);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    // Watch the parent directory, not the file: editors replace the file
    // by rename, which retires a file-level watch.
    _watcher.watch(&root, RecursiveMode::NonRecursive)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !is_workers_config(&path, &config) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }

                    let desired = match config::load_at(&config) {
                        Ok(loaded) => loaded.workers,
                        Err(err) => {
                            tracing::warn!(
                                error = %err,
                                "rejecting config change; previous configuration stays in force",
                            );
                            continue;
                        }
                    };

                    match enqueue_reconcile(&reconcile_tx, desired, "watcher").await {
                        Ok(summary) => {
                            tracing::info!(
                                planned = summary.planned,
                                started = summary.started.len(),
                                stopped = summary.stopped.len(),
                                restarted = summary.restarted.len(),
                                clean = summary.clean,
                                "watcher-triggered reconciliation completed",
                            );
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "watcher-triggered reconciliation failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Apply reconcile jobs one at a time. When a backlog builds up, only
/// the newest desired set matters: older queued jobs are superseded.
async fn reconcile_processor_task(
    orchestrator: Arc<Mutex<Orchestrator>>,
    mut reconcile_rx: mpsc::Receiver<ReconcileJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = reconcile_rx.recv() => {
                let Some(job) = maybe_job else { break };

                let mut pending = vec![job];
                while let Ok(next) = reconcile_rx.try_recv() {
                    pending.push(next);
                }
                let job = match pending.pop() {
                    Some(job) => job,
                    None => continue,
                };
                for superseded in pending {
                    tracing::debug!(
                        source = superseded.source,
                        "reconcile job superseded by a newer desired set",
                    );
                    let _ = superseded
                        .respond_to
                        .send(Err("superseded by a newer configuration".to_string()));
                }

                let summary = {
                    let mut orch = orchestrator.lock().await;
                    orch.reconcile(job.desired, job.source).await
                };
                let _ = job.respond_to.send(Ok(summary));
            }
        }
    }

    Ok(())
}

/// Periodic liveness sweep. Sweeps never overlap: the next tick waits
/// for the previous sweep (and any restarts it performed) to finish.
async fn monitor_task(
    orchestrator: Arc<Mutex<Orchestrator>>,
    settings: MonitorSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(settings.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let outcome = {
                    let mut orch = orchestrator.lock().await;
                    orch.sweep().await
                };
                if !outcome.restarted.is_empty() || !outcome.exhausted.is_empty() {
                    tracing::info!(
                        restarted = outcome.restarted.len(),
                        exhausted = outcome.exhausted.len(),
                        "liveness sweep acted",
                    );
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    orchestrator: Arc<Mutex<Orchestrator>>,
    reconcile_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let orchestrator = orchestrator.clone();
                let reconcile_tx = reconcile_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        orchestrator,
                        reconcile_tx,
                        shutdown_tx,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    orchestrator: Arc<Mutex<Orchestrator>>,
    reconcile_tx: mpsc::Sender<ReconcileJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response =
            dispatch_command(&request, &home, &orchestrator, &reconcile_tx, &shutdown_tx).await;

        write_response(&mut writer, &response).await?;
        if cmd == "shutdown" {
            break;
        }
    }

    Ok(())
}

async fn dispatch_command(
    request: &DaemonRequest,
    home: &Path,
    orchestrator: &Arc<Mutex<Orchestrator>>,
    reconcile_tx: &mpsc::Sender<ReconcileJob>,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => {
            let orch = orchestrator.lock().await;
            DaemonResponse::ok(build_status_payload(home, &orch))
        }
        "list" => {
            let orch = orchestrator.lock().await;
            match serde_json::to_value(orch.list()) {
                Ok(workers) => DaemonResponse::ok(json!({ "workers": workers })),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "start" => {
            let Some(worker) = request.worker.clone() else {
                return DaemonResponse::error("'start' requires a worker name");
            };
            let mut orch = orchestrator.lock().await;
            match orch.start(&WorkerName::from(worker)).await {
                Ok(record) => DaemonResponse::ok(json!({
                    "name": record.name,
                    "pid": record.pid,
                })),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let Some(worker) = request.worker.clone() else {
                return DaemonResponse::error("'stop' requires a worker name");
            };
            let mut orch = orchestrator.lock().await;
            match orch.stop(&WorkerName::from(worker.clone())).await {
                Ok(()) => DaemonResponse::ok(json!({ "stopped": worker })),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop-all" => {
            let mut orch = orchestrator.lock().await;
            let errors = orch.stop_all().await;
            DaemonResponse::ok(json!({
                "errors": errors
                    .iter()
                    .map(|(name, err)| json!({ "worker": name, "error": err.to_string() }))
                    .collect::<Vec<_>>(),
            }))
        }
        "reconcile" => {
            let desired = match config::load_at(&config_path(home)) {
                Ok(config) => config.workers,
                Err(err) => return DaemonResponse::error(err.to_string()),
            };
            match enqueue_reconcile(reconcile_tx, desired, "socket").await {
                Ok(summary) => match serde_json::to_value(&summary) {
                    Ok(value) => DaemonResponse::ok(value),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "doctor" => {
            let orch = orchestrator.lock().await;
            match serde_json::to_value(orch.diagnostics()) {
                Ok(value) => DaemonResponse::ok(value),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "shutdown" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn build_status_payload(home: &Path, orchestrator: &Orchestrator) -> Value {
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at": orchestrator.started_at(),
        "workers": orchestrator.tracked_names().len(),
        "socket": socket_path(home).display().to_string(),
        "config": config_path(home).display().to_string(),
    })
}

async fn enqueue_reconcile(
    reconcile_tx: &mpsc::Sender<ReconcileJob>,
    desired: Vec<WorkerSpec>,
    source: &'static str,
) -> Result<ReconcileSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    reconcile_tx
        .send(ReconcileJob {
            desired,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response"))?;
    outcome.map_err(DaemonError::Protocol)
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok(); // rotation errors are logged inside rotate_logs
            }
        }
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Match on file name, not full path: FSEvents reports canonicalized
/// paths that may not string-compare equal to ours.
fn is_workers_config(path: &Path, config: &Path) -> bool {
    path.file_name() == config.file_name()
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [
        colony_root(home),
        run_dir(home),
        logs_dir(home),
        worker_logs_dir(home),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Initialize tracing for the daemon: everything goes to stdout (for a
/// foreground `colony up`) and to the daemon's own log file, which is
/// what `colony logs --daemon` tails and what rotation sweeps.
fn init_tracing(home: &Path) {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match open_daemon_log(home) {
        Ok(file) => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Arc::new(file)))
                .try_init();
        }
        Err(err) => {
            let _ = fmt().with_env_filter(filter).with_target(false).try_init();
            tracing::warn!(error = %err, "daemon log file unavailable; logging to stdout only");
        }
    }
}

/// Append-mode handle to the daemon's log file, creating the logs
/// directory on first use.
fn open_daemon_log(home: &Path) -> std::io::Result<std::fs::File> {
    let path = daemon_log_path(home);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
