//! Error types for colony-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from record-store operations.
///
/// Every invariant in the orchestrator depends on the store being
/// trustworthy, so callers treat these as fatal rather than recoverable.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure on the save path.
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The store file exists but cannot be parsed.
    #[error("failed to parse record store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
