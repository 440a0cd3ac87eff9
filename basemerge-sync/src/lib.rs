//! # basemerge-sync
//!
//! Join-then-diff synchronization of merged tables.
//!
//! For each configured target the mapping table is right-joined onto the
//! source table, the result is classified against the merged table's current
//! rows, and only the difference is written back. Call [`pipeline::run`] to
//! sync against the configured base file, or [`sync_targets`] to drive any
//! [`basemerge_core::TableStore`].

pub mod classify;
pub mod diff;
pub mod error;
pub mod extract;
pub mod freshness;
pub mod issue;
pub mod join;
pub mod pipeline;
pub mod provision;
pub mod state;
pub mod throttle;
pub mod writer;

pub use classify::{fingerprint, new_rows, plan, resolve_ids, stale_rows, SyncPlan};
pub use diff::{diff_in_store, diff_target, TargetDiff};
pub use error::SyncError;
pub use extract::extract;
pub use freshness::{FreshnessSignal, TargetStatus};
pub use issue::{Operation, SyncIssue};
pub use join::{field_union, right_join};
pub use pipeline::{
    run, sync_target, sync_targets, ProvisionLedger, RunReport, SyncScope, TargetFailure,
    TargetReport,
};
pub use provision::{prepare_fields, provision, ProvisionOutcome};
pub use throttle::{RetryPolicy, Throttle, TokenBucket};
pub use writer::{WriteResult, Writer};
