//! Error types for basemerge-sync.

use std::path::PathBuf;

use thiserror::Error;

use basemerge_core::{ConfigError, StoreError};

/// Errors that abort a sync run (or a single target of it).
///
/// Per-row and per-batch problems are not errors; they are collected as
/// [`crate::SyncIssue`]s and the run continues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error loading or validating the config.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An error from the store that prevents reading a table.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (sync state).
    #[error("sync state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested target is not in the config.
    #[error("no target for mapping table '{0}' in config")]
    UnknownTarget(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
