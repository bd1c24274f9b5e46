//! File-backed Process Record Store.
//!
//! One YAML file per controller instance, keyed by worker name:
//!
//! ```text
//! ~/.colony/
//!   run/
//!     records.yaml   (mode 0600 — atomically rewritten on every change)
//! ```
//!
//! The store is an owned value (no global state): all mutating access
//! goes through whoever holds the [`RecordStore`], and every mutation
//! rewrites the file via write-temp-then-rename so a crash mid-write
//! never leaves a half-written record on disk.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::{ProcessRecord, WorkerName};

/// In-memory cache of the record file, kept consistent by routing all
/// writes through this single owner.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: BTreeMap<WorkerName, ProcessRecord>,
}

impl RecordStore {
    /// Open the store at `path`, loading any persisted records.
    ///
    /// A missing file is an empty store. An unreadable or malformed file
    /// is `StoreError::Parse` — the caller must not continue, since
    /// orphan reclaim and reconciliation both trust this file.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_yaml::from_str(&contents).map_err(|source| {
                StoreError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StoreError::Io(err)),
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &WorkerName) -> Option<&ProcessRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &WorkerName) -> bool {
        self.records.contains_key(name)
    }

    /// Tracked worker names, sorted.
    pub fn names(&self) -> Vec<WorkerName> {
        self.records.keys().cloned().collect()
    }

    /// Point-in-time copy for readers (health sweep, dashboard, CLI);
    /// a concurrent insert/remove never produces a torn read.
    pub fn snapshot(&self) -> BTreeMap<WorkerName, ProcessRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert (or replace) a record and durably persist the store.
    pub fn insert(&mut self, record: ProcessRecord) -> Result<(), StoreError> {
        self.records.insert(record.name.clone(), record);
        self.persist()
    }

    /// Remove a record, persisting only if something was actually removed.
    pub fn remove(&mut self, name: &WorkerName) -> Result<Option<ProcessRecord>, StoreError> {
        let removed = self.records.remove(name);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
    /// `.tmp` is always in the same directory as the target (same
    /// filesystem — rename stays atomic).
    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                set_dir_permissions(parent)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records.yaml".to_string());
        let tmp_path = self.path.with_file_name(format!("{file_name}.tmp"));

        let yaml = serde_yaml::to_string(&self.records)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
