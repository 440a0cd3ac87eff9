//! Unified diff support for `basemerge diff`.
//!
//! Both sides are rendered one row per line as canonical JSON (identifiers
//! removed, keys sorted) and the lines sorted, so the diff shows exactly the
//! rows a sync would insert (`+`) and delete (`-`).

use std::path::Path;

use similar::TextDiff;

use basemerge_core::config::{self, SyncConfig, TargetConfig};
use basemerge_core::{base, Row, StoreError, TableName, TableStore};

use crate::classify;
use crate::issue::SyncIssue;
use crate::pipeline::{destination_rows, prepare};
use crate::SyncError;

/// Diff result for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDiff {
    pub mapping_table: TableName,
    pub merged_table: TableName,
    /// Whether the merged table exists yet.
    pub provisioned: bool,
    pub inserts: usize,
    pub deletes: usize,
    /// Empty when the destination is already current.
    pub unified_diff: String,
}

impl TargetDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts == 0 && self.deletes == 0
    }
}

/// Compute what a sync of `target` would change. Nothing is written.
pub fn diff_in_store<S: TableStore + ?Sized>(
    store: &S,
    config: &SyncConfig,
    target: &TargetConfig,
) -> Result<TargetDiff, StoreError> {
    let mut issues: Vec<SyncIssue> = Vec::new();
    let prepared = prepare(store, config, target, &mut issues)?;
    let merged = prepared.merged_table;
    let existing = destination_rows(store, &merged, &mut issues)?;
    let plan = classify::plan(&prepared.rows, &existing);

    let unified_diff = if plan.is_empty() {
        String::new()
    } else {
        let old = render(&existing);
        let new = render(&prepared.rows);
        let old_header = format!("a/{merged}");
        let new_header = format!("b/{merged}");
        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string()
    };

    Ok(TargetDiff {
        mapping_table: target.mapping_table.clone(),
        provisioned: store.table_exists(&merged),
        merged_table: merged,
        inserts: plan.inserts.len(),
        deletes: plan.deletes.len(),
        unified_diff,
    })
}

/// Load config and base file from `home` and diff one target.
pub fn diff_target(home: &Path, mapping_table: &str) -> Result<TargetDiff, SyncError> {
    let config = config::load_at(home)?;
    let target = config
        .target(mapping_table)
        .ok_or_else(|| SyncError::UnknownTarget(mapping_table.to_string()))?;
    let store = base::load(&config.base_path_at(home))?;
    Ok(diff_in_store(&store, &config, target)?)
}

fn render(rows: &[Row]) -> String {
    let mut lines: Vec<String> = rows
        .iter()
        .filter_map(|row| serde_json::to_string(&row.fields).ok())
        .collect();
    lines.sort();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::pipeline::{run, ProvisionLedger, SyncScope};

    use super::*;

    fn home_with_sample() -> TempDir {
        let home = TempDir::new().expect("home");
        let cfg = config::init_at(home.path(), None).expect("init");
        base::save(&cfg.base_path_at(home.path()), &base::sample()).expect("save base");
        home
    }

    #[test]
    fn unsynced_target_diffs_as_all_inserts() {
        let home = home_with_sample();
        let diff = diff_target(home.path(), "Team B Mapping").expect("diff");
        assert!(!diff.provisioned);
        assert_eq!(diff.inserts, 2);
        assert_eq!(diff.deletes, 0);
        assert!(diff.unified_diff.contains("--- a/Team B Mapping Merged Table"));
        assert!(diff.unified_diff.contains("+++ b/Team B Mapping Merged Table"));
        assert!(diff.unified_diff.contains("+{\"Category\":null,\"Concept Name\":\"Prototype X\""));
    }

    #[test]
    fn no_diff_after_clean_sync() {
        let home = home_with_sample();
        run(home.path(), SyncScope::All, false, &mut ProvisionLedger::new()).expect("sync");
        let diff = diff_target(home.path(), "Team A Mapping").expect("diff");
        assert!(diff.is_empty());
        assert!(diff.provisioned);
        assert!(diff.unified_diff.is_empty());
    }

    #[test]
    fn upstream_edit_shows_minus_and_plus() {
        let home = home_with_sample();
        run(home.path(), SyncScope::All, false, &mut ProvisionLedger::new()).expect("sync");

        let cfg = config::load_at(home.path()).unwrap();
        let path = cfg.base_path_at(home.path());
        let mut store = base::load(&path).unwrap();
        let mapping = TableName::from("Team A Mapping");
        let lee = store
            .records(&mapping)
            .unwrap()
            .into_iter()
            .find(|r| r.fields.get("Team A Owner") == Some(&serde_json::json!("Lee")))
            .unwrap();
        store.delete_records(&mapping, &[lee.id]).unwrap();
        base::save(&path, &store).unwrap();

        let diff = diff_target(home.path(), "Team A Mapping").expect("diff");
        assert_eq!((diff.inserts, diff.deletes), (0, 1));
        assert!(diff.unified_diff.lines().any(|l| l.starts_with('-') && l.contains("Storm Shell")));
    }

    #[test]
    fn unknown_target_errors() {
        let home = home_with_sample();
        let err = diff_target(home.path(), "Nope").unwrap_err();
        assert!(matches!(err, SyncError::UnknownTarget(_)));
    }
}
