//! Domain types for the Colony orchestrator.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed worker name — the stable identity key across the
/// record store, the health monitor, and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerName(pub String);

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkerName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Declarative description of one worker to keep running.
///
/// Immutable once constructed; a changed spec is a new value. The
/// reconciler detects restart candidates by plain value inequality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: WorkerName,
    /// Executable to run (resolved through `$PATH` at spawn time).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment on top of the controller's own environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Free-form grouping/filtering labels.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl WorkerSpec {
    /// The full argv actually handed to the OS, kept on the record for
    /// audit and restart.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + self.args.len());
        argv.push(self.command.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Runtime record for a started worker, persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: WorkerName,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// The argv actually used at spawn time.
    pub command: Vec<String>,
    pub log_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
