//! Size-based log rotation for the daemon's own logs and the per-worker
//! log sinks.
//!
//! Rotates any log exceeding 10 MiB, keeping at most 5 rotated copies:
//!   relay.log → relay.log.1 → relay.log.2 → … → relay.log.5

use std::fs;
use std::io;
use std::path::Path;

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size exceeds `max_bytes`.
///
/// Returns `true` if rotation occurred, `false` if the file was under the
/// threshold (or did not exist yet).
///
/// Rotation is rename-based: a worker that still holds the file open
/// keeps writing into the rotated copy until its next restart reopens
/// the fresh sink.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if size < max_bytes {
        return Ok(false);
    }

    // Remove the oldest file so we don't exceed max_files.
    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    // Shift existing rotated files up by one.
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        let dst = numbered_path(log_path, n + 1);
        if src.exists() {
            fs::rename(&src, &dst)?;
        }
    }

    // Rename live log → .1
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // Create a fresh empty log so the path is always writable.
    let _ = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;

    Ok(true)
}

/// Rotate the daemon's own log plus every `*.log` under the worker sink
/// directory.
///
/// Errors for one file are logged as warnings and never block the rest.
pub fn rotate_logs(home: &Path) {
    let mut targets = vec![crate::paths::daemon_log_path(home)];
    targets.extend(worker_log_files(&crate::paths::worker_logs_dir(home)));

    for log_path in &targets {
        match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// Live (non-rotated) worker sinks: `<dir>/*.log` exactly.
fn worker_log_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut logs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .collect();
    logs.sort();
    logs
}

/// Build the path for the `n`-th rotated copy of `base` (e.g. `relay.log.2`).
fn numbered_path(base: &Path, n: usize) -> std::path::PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("daemon.log");
    base.with_file_name(format!("{name}.{n}"))
}
