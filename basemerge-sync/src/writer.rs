//! Batched, permission-gated write-back to a destination table.
//!
//! ## Per batch
//!
//! 1. Ask the store's permission check; on `false` record `PermissionDenied`
//!    and skip the batch.
//! 2. In dry-run mode count the batch and stop here.
//! 3. Wait on the rate limiter.
//! 4. Make the call, retrying while the store reports throttling.
//! 5. On any other failure record `WriteFailure` and move to the next batch.

use serde::Serialize;
use serde_json::Value;

use basemerge_core::config::SyncConfig;
use basemerge_core::{Row, TableName, TableStore};

use crate::classify;
use crate::issue::{self, Operation, SyncIssue};
use crate::throttle::Throttle;

/// Outcome of one write operation over a set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WriteResult {
    /// Rows the store accepted.
    pub written: usize,
    /// `--dry-run` mode: rows that *would* have been written.
    pub would_write: usize,
    /// Rows skipped for denied permission, failure or lookup miss.
    pub skipped: usize,
}

impl WriteResult {
    /// Rows written, or that would have been in dry-run mode.
    pub fn effective(&self) -> usize {
        self.written + self.would_write
    }
}

/// Applies inserts and deletes in batches.
#[derive(Debug, Clone)]
pub struct Writer {
    batch_size: usize,
    dry_run: bool,
    throttle: Throttle,
}

impl Writer {
    pub fn new(batch_size: usize, dry_run: bool, throttle: Throttle) -> Self {
        Self {
            batch_size: batch_size.max(1),
            dry_run,
            throttle,
        }
    }

    /// Writer configured from `config`'s batch size, rate limit and retry
    /// policy.
    pub fn from_config(config: &SyncConfig, dry_run: bool) -> Self {
        Self::new(
            config.batch_size,
            dry_run,
            Throttle::new(&config.rate_limit, &config.retry),
        )
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Create one record per row. Identifiers on `rows` are dropped. Nothing
    /// is sent when `rows` is empty.
    pub fn insert_rows<S: TableStore + ?Sized>(
        &mut self,
        store: &mut S,
        table: &TableName,
        rows: &[Row],
        issues: &mut Vec<SyncIssue>,
    ) -> WriteResult {
        let mut result = WriteResult::default();
        if rows.is_empty() {
            return result;
        }
        let rows: Vec<Row> = rows.iter().map(Row::without_id).collect();

        for batch in rows.chunks(self.batch_size) {
            if !store.can_create_records(table, batch) {
                deny(issues, table, Operation::CreateRecords);
                result.skipped += batch.len();
                continue;
            }
            if self.dry_run {
                tracing::info!("[dry-run] would create {} record(s) in '{}'", batch.len(), table);
                result.would_write += batch.len();
                continue;
            }
            match self.throttle.call(|| store.create_records(table, batch)) {
                Ok(ids) => {
                    tracing::info!("created {} record(s) in '{}'", ids.len(), table);
                    result.written += batch.len();
                }
                Err(e) => {
                    fail(issues, table, Operation::CreateRecords, batch.len(), e.to_string());
                    result.skipped += batch.len();
                }
            }
        }
        result
    }

    /// Delete the destination records matching `stale` by value.
    ///
    /// Ids are resolved against `snapshot`, each snapshot record at most
    /// once. A stale row with no match is recorded as `LookupMiss`, labelled
    /// with its `key` value.
    pub fn delete_rows<S: TableStore + ?Sized>(
        &mut self,
        store: &mut S,
        table: &TableName,
        stale: &[Row],
        snapshot: &[Row],
        key: &str,
        issues: &mut Vec<SyncIssue>,
    ) -> WriteResult {
        let mut result = WriteResult::default();
        if stale.is_empty() {
            return result;
        }

        let (ids, misses) = classify::resolve_ids(stale, snapshot);
        for row in &misses {
            issue::record(
                issues,
                SyncIssue::LookupMiss {
                    table: table.clone(),
                    key: row.get(key).and_then(key_label),
                },
            );
        }
        result.skipped += misses.len();

        for batch in ids.chunks(self.batch_size) {
            if !store.can_delete_records(table, batch) {
                deny(issues, table, Operation::DeleteRecords);
                result.skipped += batch.len();
                continue;
            }
            if self.dry_run {
                tracing::info!("[dry-run] would delete {} record(s) from '{}'", batch.len(), table);
                result.would_write += batch.len();
                continue;
            }
            match self.throttle.call(|| store.delete_records(table, batch)) {
                Ok(()) => {
                    tracing::info!("deleted {} record(s) from '{}'", batch.len(), table);
                    result.written += batch.len();
                }
                Err(e) => {
                    fail(issues, table, Operation::DeleteRecords, batch.len(), e.to_string());
                    result.skipped += batch.len();
                }
            }
        }
        result
    }
}

fn deny(issues: &mut Vec<SyncIssue>, table: &TableName, operation: Operation) {
    issue::record(
        issues,
        SyncIssue::PermissionDenied {
            table: table.clone(),
            operation,
        },
    );
}

fn fail(
    issues: &mut Vec<SyncIssue>,
    table: &TableName,
    operation: Operation,
    rows: usize,
    message: String,
) {
    issue::record(
        issues,
        SyncIssue::WriteFailure {
            table: table.clone(),
            operation,
            rows,
            message,
        },
    );
}

fn key_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
