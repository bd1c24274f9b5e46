use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_LABEL: &str = "dev.colony.daemon";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const WORKERS_CONFIG: &str = "workers.yaml";
pub const RECORDS_FILE: &str = "records.yaml";

pub fn colony_root(home: &Path) -> PathBuf {
    home.join(".colony")
}

pub fn config_path(home: &Path) -> PathBuf {
    colony_root(home).join(WORKERS_CONFIG)
}

pub fn run_dir(home: &Path) -> PathBuf {
    colony_root(home).join("run")
}

pub fn records_path(home: &Path) -> PathBuf {
    run_dir(home).join(RECORDS_FILE)
}

pub fn socket_path(home: &Path) -> PathBuf {
    colony_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    colony_root(home).join("logs")
}

/// Per-worker log sinks live one level below the daemon's own logs so a
/// worker named `daemon` can never collide with the daemon's files.
pub fn worker_logs_dir(home: &Path) -> PathBuf {
    logs_dir(home).join("workers")
}

/// The daemon's own log file, written by its tracing subscriber.
pub fn daemon_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}
