//! # colony-daemon
//!
//! The colony controller: a background daemon that keeps the configured
//! workers running. Hosts the orchestrator facade (supervisor + health
//! monitor + reconciler behind one mutex), a config file watcher, the
//! periodic liveness sweep, and a Unix-socket control protocol.

pub mod config;
pub mod error;
pub mod log_rotation;
pub mod monitor;
pub mod orchestrator;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use config::{ColonyConfig, MonitorSettings};
pub use error::DaemonError;
pub use monitor::{HealthMonitor, HeartbeatSource, SweepOutcome};
pub use orchestrator::{DiagnosticsReport, Orchestrator, ReconcileSummary, WorkerView};
pub use protocol::{DaemonRequest, DaemonResponse};
