//! Per-target freshness signal for `basemerge status`.
//!
//! Signal precedence:
//! 1. `NeverSynced` (no sync state recorded)
//! 2. `Unprovisioned` (merged table missing)
//! 3. `Pending` (a sync would insert or delete rows)
//! 4. `Current`

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use basemerge_core::config::{self, SyncConfig, TargetConfig};
use basemerge_core::{base, TableName, TableStore};

use crate::classify;
use crate::pipeline::{destination_rows, prepare};
use crate::state;
use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FreshnessSignal {
    NeverSynced,
    Unprovisioned,
    Pending { inserts: usize, deletes: usize },
    Current,
}

impl fmt::Display for FreshnessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessSignal::NeverSynced => f.write_str("NEVER SYNCED"),
            FreshnessSignal::Unprovisioned => f.write_str("UNPROVISIONED"),
            FreshnessSignal::Pending { inserts, deletes } => {
                write!(f, "PENDING (+{inserts} / -{deletes})")
            }
            FreshnessSignal::Current => f.write_str("CURRENT"),
        }
    }
}

/// One row of `basemerge status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub mapping_table: TableName,
    pub merged_table: TableName,
    pub signal: FreshnessSignal,
    pub last_synced: Option<DateTime<Utc>>,
    /// Rows recorded in the merged table at the last sync.
    pub rows: Option<usize>,
}

/// Classify one target against the store and its recorded sync state.
pub fn check<S: TableStore + ?Sized>(
    home: &Path,
    store: &S,
    config: &SyncConfig,
    target: &TargetConfig,
) -> Result<TargetStatus, SyncError> {
    let recorded = state::load_at(home, &target.mapping_table.0)?;
    let merged_table = target.merged_table_name();

    let signal = if recorded.is_none() {
        FreshnessSignal::NeverSynced
    } else if !store.table_exists(&merged_table) {
        FreshnessSignal::Unprovisioned
    } else {
        let mut issues = Vec::new();
        let prepared = prepare(store, config, target, &mut issues)?;
        let existing = destination_rows(store, &merged_table, &mut issues)?;
        let plan = classify::plan(&prepared.rows, &existing);
        if plan.is_empty() {
            FreshnessSignal::Current
        } else {
            FreshnessSignal::Pending {
                inserts: plan.inserts.len(),
                deletes: plan.deletes.len(),
            }
        }
    };

    Ok(TargetStatus {
        mapping_table: target.mapping_table.clone(),
        merged_table,
        signal,
        last_synced: recorded.as_ref().map(|s| s.synced_at),
        rows: recorded.map(|s| s.rows),
    })
}

/// Status of every configured target, in config order.
pub fn status_at(home: &Path) -> Result<Vec<TargetStatus>, SyncError> {
    let config = config::load_at(home)?;
    let store = base::load(&config.base_path_at(home))?;
    config
        .targets
        .iter()
        .map(|target| check(home, &store, &config, target))
        .collect()
}

/// Format age from a chrono timestamp (sync state `synced_at`).
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let now = Utc::now();
    let age = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

/// Compact age: `42s`, `5m`, `3h`, `2d`.
pub fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
