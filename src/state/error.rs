use std::path::PathBuf;

use thiserror::Error;

/// Errors from checkpoint and marker persistence. All of these abort the
/// cycle; the previously persisted checkpoint stays on disk.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}
