//! Error types for basemerge-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{RecordId, TableName};

/// All errors that can arise from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.basemerge/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// The config parsed but describes something unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised by a [`crate::store::TableStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{0}' not found")]
    TableNotFound(TableName),

    #[error("table '{0}' already exists")]
    TableExists(TableName),

    #[error("unknown field '{field}' in table '{table}'")]
    UnknownField { table: TableName, field: String },

    #[error("record {id} not found in table '{table}'")]
    RecordNotFound { table: TableName, id: RecordId },

    /// The store refused the call because its write rate was exceeded.
    #[error("store throttled the request")]
    Throttled { retry_after: Option<Duration> },

    #[error("base file not found at {path}")]
    BaseNotFound { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse base at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
