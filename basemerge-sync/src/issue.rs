//! Non-fatal problems met while syncing a target.
//!
//! A run never stops for one of these. Each is logged when it is recorded
//! and returned in the target's report.

use std::fmt;

use serde::Serialize;

use basemerge_core::{RecordId, TableName};

/// Mutation a permission check or write was guarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateTable,
    CreateRecords,
    DeleteRecords,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable => write!(f, "create table"),
            Operation::CreateRecords => write!(f, "create records"),
            Operation::DeleteRecords => write!(f, "delete records"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    /// A nested-typed field held a scalar; the value was kept as-is.
    ShapeMismatch {
        table: TableName,
        field: String,
        record: RecordId,
    },
    /// The store's permission check said no; the call was not made.
    PermissionDenied {
        table: TableName,
        operation: Operation,
    },
    /// A stale row had no matching destination record left to delete.
    LookupMiss { table: TableName, key: Option<String> },
    /// A write batch failed after retries.
    WriteFailure {
        table: TableName,
        operation: Operation,
        rows: usize,
        message: String,
    },
}

impl SyncIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncIssue::ShapeMismatch { .. } => "shape_mismatch",
            SyncIssue::PermissionDenied { .. } => "permission_denied",
            SyncIssue::LookupMiss { .. } => "lookup_miss",
            SyncIssue::WriteFailure { .. } => "write_failure",
        }
    }

    /// Log the issue at a level matching its severity.
    pub(crate) fn log(&self) {
        match self {
            SyncIssue::ShapeMismatch { .. } | SyncIssue::PermissionDenied { .. } => {
                tracing::warn!("{}", self)
            }
            SyncIssue::LookupMiss { .. } | SyncIssue::WriteFailure { .. } => {
                tracing::error!("{}", self)
            }
        }
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncIssue::ShapeMismatch {
                table,
                field,
                record,
            } => write!(
                f,
                "'{table}'.{field} on {record} is not a nested value; left as-is"
            ),
            SyncIssue::PermissionDenied { table, operation } => {
                write!(f, "no permission to {operation} on '{table}'; skipped")
            }
            SyncIssue::LookupMiss { table, key } => match key {
                Some(key) => write!(f, "stale row '{key}' has no record in '{table}'"),
                None => write!(f, "stale row has no record in '{table}'"),
            },
            SyncIssue::WriteFailure {
                table,
                operation,
                rows,
                message,
            } => write!(f, "{operation} on '{table}' failed for {rows} row(s): {message}"),
        }
    }
}

/// Push `issue` onto `issues`, logging it first.
pub(crate) fn record(issues: &mut Vec<SyncIssue>, issue: SyncIssue) {
    issue.log();
    issues.push(issue);
}
