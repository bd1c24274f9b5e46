//! The declarative worker configuration (`workers.yaml`).
//!
//! ```yaml
//! workers:
//!   - name: relay
//!     command: python3
//!     args: ["relay.py"]
//!     env:
//!       MODE: fast
//! monitor:
//!   sweep_interval_secs: 5
//!   max_restarts: 3
//! ```
//!
//! A missing file is an empty desired set, not an error; a file that
//! exists but fails to parse or validate is rejected wholesale and the
//! previously applied configuration stays in force.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use colony_core::{RestartPolicy, WorkerSpec};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};

/// Root of `workers.yaml`: the desired worker set plus monitor tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColonyConfig {
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Health-monitor tuning knobs. Every field has a serde default so a
/// config that only lists workers gets sensible behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between liveness sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Consecutive failed checks before `Healthy` becomes `Unresponsive`.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How stale a heartbeat may be before a check counts as failed.
    #[serde(default = "default_heartbeat_grace_secs")]
    pub heartbeat_grace_secs: u64,
    /// Automatic restart budget per worker instance.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Backoff before the first automatic restart; doubles per restart.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Graceful-shutdown window per worker before SIGKILL.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_heartbeat_grace_secs() -> u64 {
    120
}
fn default_max_restarts() -> u32 {
    3
}
fn default_base_backoff_secs() -> u64 {
    1
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            failure_threshold: default_failure_threshold(),
            heartbeat_grace_secs: default_heartbeat_grace_secs(),
            max_restarts: default_max_restarts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl MonitorSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.max_restarts,
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

/// Load and validate `workers.yaml` from an explicit path.
pub fn load_at(path: &Path) -> Result<ColonyConfig, DaemonError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ColonyConfig::default()),
        Err(err) => return Err(io_err(path, err)),
    };

    let config: ColonyConfig =
        serde_yaml::from_str(&raw).map_err(|source| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    validate(path, &config)?;
    Ok(config)
}

fn validate(path: &Path, config: &ColonyConfig) -> Result<(), DaemonError> {
    let invalid = |message: String| DaemonError::InvalidConfig {
        path: path.to_path_buf(),
        message,
    };

    let mut seen = BTreeSet::new();
    for spec in &config.workers {
        if spec.name.0.trim().is_empty() {
            return Err(invalid("worker with empty name".to_string()));
        }
        if spec.name.0.contains(['/', '\0']) {
            return Err(invalid(format!(
                "worker name '{}' contains a path separator",
                spec.name
            )));
        }
        if spec.command.trim().is_empty() {
            return Err(invalid(format!("worker '{}' has an empty command", spec.name)));
        }
        if !seen.insert(&spec.name) {
            return Err(invalid(format!("duplicate worker name '{}'", spec.name)));
        }
    }
    Ok(())
}
