//! Shared sync pipeline used by the CLI and the daemon.
//!
//! Per target: extract source and mapping → right join → provision the
//! merged table → snapshot it → classify → write inserts, then deletes.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use basemerge_core::config::{self, SyncConfig, TargetConfig};
use basemerge_core::{
    base, FieldDescriptor, ProvisionState, Row, StoreError, TableName, TableStore,
};

use crate::classify::{self, SyncPlan};
use crate::extract::extract;
use crate::issue::SyncIssue;
use crate::join::{field_union, right_join};
use crate::provision::{provision, ProvisionOutcome};
use crate::state::{self, SyncState};
use crate::writer::{WriteResult, Writer};
use crate::SyncError;

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Sync every configured target.
    All,
    /// Sync the target for one mapping table.
    Target(String),
}

/// Provision state per merged table, owned by whoever drives repeated runs.
pub type ProvisionLedger = HashMap<TableName, ProvisionState>;

/// Join output for one target, ready to be classified.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub merged_table: TableName,
    pub rows: Vec<Row>,
    pub fields: Vec<FieldDescriptor>,
}

/// What happened to one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub mapping_table: TableName,
    pub merged_table: TableName,
    pub provision: ProvisionOutcome,
    pub dry_run: bool,
    /// Rows in the join output already present in the destination.
    pub unchanged: usize,
    pub inserted: WriteResult,
    pub deleted: WriteResult,
    pub issues: Vec<SyncIssue>,
}

impl TargetReport {
    pub fn is_noop(&self) -> bool {
        self.inserted.effective() == 0 && self.deleted.effective() == 0
    }

    /// Whether the store was mutated (table created or rows written).
    pub fn changed_store(&self) -> bool {
        self.provision == ProvisionOutcome::Created
            || self.inserted.written > 0
            || self.deleted.written > 0
    }
}

/// A target that could not be processed at all.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub mapping_table: TableName,
    pub error: String,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
    pub failures: Vec<TargetFailure>,
}

// ---------------------------------------------------------------------------
// Per-target steps
// ---------------------------------------------------------------------------

/// Extract the source and mapping tables and right-join them on the key.
pub fn prepare<S: TableStore + ?Sized>(
    store: &S,
    config: &SyncConfig,
    target: &TargetConfig,
    issues: &mut Vec<SyncIssue>,
) -> Result<Prepared, StoreError> {
    let source = extract(store, &config.source_table, issues)?;
    let mapping = extract(store, &target.mapping_table, issues)?;
    let fields = field_union(&source.fields, &mapping.fields);
    let rows = right_join(
        &source.rows,
        &mapping.rows,
        &config.join_key,
        &config.join_key,
        &fields,
    );
    tracing::debug!(
        "joined '{}' onto '{}': {} row(s)",
        config.source_table,
        target.mapping_table,
        rows.len()
    );
    Ok(Prepared {
        merged_table: target.merged_table_name(),
        rows,
        fields,
    })
}

/// Current rows of the merged table (ids kept), or none if it is missing.
pub fn destination_rows<S: TableStore + ?Sized>(
    store: &S,
    merged_table: &TableName,
    issues: &mut Vec<SyncIssue>,
) -> Result<Vec<Row>, StoreError> {
    if !store.table_exists(merged_table) {
        return Ok(Vec::new());
    }
    Ok(extract(store, merged_table, issues)?.rows)
}

/// Run the whole pipeline for one target.
///
/// `state` is the caller's record of whether the merged table has been
/// provisioned; it is updated in place.
pub fn sync_target<S: TableStore + ?Sized>(
    store: &mut S,
    config: &SyncConfig,
    target: &TargetConfig,
    state: &mut ProvisionState,
    writer: &mut Writer,
) -> Result<TargetReport, StoreError> {
    let mut issues = Vec::new();
    let prepared = prepare(&*store, config, target, &mut issues)?;
    let merged = prepared.merged_table.clone();

    let outcome = provision(
        store,
        &merged,
        &prepared.fields,
        &config.join_key,
        state,
        writer.is_dry_run(),
        &mut issues,
    )?;

    let mut report = TargetReport {
        mapping_table: target.mapping_table.clone(),
        merged_table: merged.clone(),
        provision: outcome,
        dry_run: writer.is_dry_run(),
        unchanged: 0,
        inserted: WriteResult::default(),
        deleted: WriteResult::default(),
        issues: Vec::new(),
    };

    match outcome {
        ProvisionOutcome::Denied => {}
        ProvisionOutcome::WouldCreate => {
            // A fresh table: everything is new.
            report.inserted.would_write = prepared.rows.len();
        }
        _ => {
            let snapshot = destination_rows(&*store, &merged, &mut issues)?;
            let SyncPlan {
                inserts,
                deletes,
                unchanged,
            } = classify::plan(&prepared.rows, &snapshot);
            tracing::info!(
                "'{}': {} new, {} stale, {} unchanged",
                merged,
                inserts.len(),
                deletes.len(),
                unchanged
            );
            report.unchanged = unchanged;
            report.inserted = writer.insert_rows(store, &merged, &inserts, &mut issues);
            report.deleted = writer.delete_rows(
                store,
                &merged,
                &deletes,
                &snapshot,
                &config.join_key,
                &mut issues,
            );
        }
    }

    report.issues = issues;
    Ok(report)
}

/// Targets named by `scope`, in config order.
pub fn select_targets<'a>(
    config: &'a SyncConfig,
    scope: &SyncScope,
) -> Result<Vec<&'a TargetConfig>, SyncError> {
    match scope {
        SyncScope::All => Ok(config.targets.iter().collect()),
        SyncScope::Target(name) => config
            .target(name)
            .map(|t| vec![t])
            .ok_or_else(|| SyncError::UnknownTarget(name.clone())),
    }
}

/// Sync every target in `scope` one after the other.
///
/// A store error aborts only the target it happened in; it is logged and
/// returned as a [`TargetFailure`].
pub fn sync_targets<S: TableStore + ?Sized>(
    store: &mut S,
    config: &SyncConfig,
    scope: &SyncScope,
    ledger: &mut ProvisionLedger,
    dry_run: bool,
) -> Result<RunReport, SyncError> {
    let targets = select_targets(config, scope)?;
    let mut writer = Writer::from_config(config, dry_run);
    let mut report = RunReport::default();

    for target in targets {
        let state = ledger.entry(target.merged_table_name()).or_default();
        match sync_target(store, config, target, state, &mut writer) {
            Ok(r) => report.targets.push(r),
            Err(e) => {
                tracing::error!("sync of '{}' failed: {}", target.mapping_table, e);
                report.failures.push(TargetFailure {
                    mapping_table: target.mapping_table.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// File-backed entrypoint
// ---------------------------------------------------------------------------

/// Run the sync pipeline for a scope against the configured base file.
///
/// This is the canonical entrypoint for both `basemerge sync` and the
/// daemon processor. Outside dry-run mode the base file is saved and each
/// completed target's [`SyncState`] is recorded.
pub fn run(
    home: &Path,
    scope: SyncScope,
    dry_run: bool,
    ledger: &mut ProvisionLedger,
) -> Result<RunReport, SyncError> {
    let started_at = Utc::now();
    let config = config::load_at(home)?;
    let base_path = config.base_path_at(home);
    let mut store = base::load(&base_path)?;

    let report = sync_targets(&mut store, &config, &scope, ledger, dry_run)?;
    if dry_run {
        return Ok(report);
    }

    // An unchanged base is not rewritten, so file watchers see no event.
    if report.targets.iter().any(TargetReport::changed_store) {
        base::save(&base_path, &store)?;
    }
    for target in &report.targets {
        if !target.provision.table_ready() {
            continue;
        }
        let rows = store.records(&target.merged_table).map(|r| r.len()).unwrap_or(0);
        let state = SyncState {
            synced_at: started_at,
            merged_table: target.merged_table.to_string(),
            inserted: target.inserted.written,
            deleted: target.deleted.written,
            rows,
            issues: target.issues.len(),
        };
        state::save_at(home, &target.mapping_table.0, &state)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basemerge_core::{Base, FieldType};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::throttle::Throttle;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values.into_iter().map(|v| Row::from_json(v).unwrap()).collect()
    }

    fn small_base() -> Base {
        let mut base = Base::new();
        base.insert_table(
            "Source Data",
            vec![
                FieldDescriptor::new("Concept Name", FieldType::SingleLineText),
                FieldDescriptor::new("X", FieldType::Number),
            ],
            rows(vec![json!({"Concept Name": "A", "X": 1})]),
        )
        .unwrap();
        base.insert_table(
            "Team A Mapping",
            vec![
                FieldDescriptor::new("Concept Name", FieldType::SingleLineText),
                FieldDescriptor::new("Y", FieldType::Number),
            ],
            rows(vec![
                json!({"Concept Name": "A", "Y": 2}),
                json!({"Concept Name": "B", "Y": 3}),
            ]),
        )
        .unwrap();
        base
    }

    fn config() -> SyncConfig {
        SyncConfig {
            targets: vec![TargetConfig::new("Team A Mapping")],
            ..SyncConfig::default()
        }
    }

    fn writer(dry_run: bool) -> Writer {
        Writer::new(50, dry_run, Throttle::unlimited())
    }

    fn run_target(
        base: &mut Base,
        config: &SyncConfig,
        state: &mut ProvisionState,
        dry_run: bool,
    ) -> Result<TargetReport, StoreError> {
        sync_target(base, config, &config.targets[0], state, &mut writer(dry_run))
    }

    fn merged_values(base: &Base) -> Vec<Row> {
        let mut out: Vec<Row> = base
            .records(&TableName::from("Team A Mapping Merged Table"))
            .unwrap()
            .into_iter()
            .map(|r| r.into_row().without_id())
            .collect();
        out.sort_by_key(|r| r.get("Concept Name").map(Value::to_string));
        out
    }

    #[test]
    fn first_run_creates_and_fills_merged_table() {
        let mut base = small_base();
        let config = config();
        let mut state = ProvisionState::NotProvisioned;

        let report = run_target(&mut base, &config, &mut state, false).expect("sync");
        assert_eq!(report.provision, ProvisionOutcome::Created);
        assert_eq!(report.inserted.written, 2);
        assert_eq!(state, ProvisionState::Provisioned);
        assert_eq!(
            merged_values(&base),
            rows(vec![
                json!({"Concept Name": "A", "X": 1, "Y": 2}),
                json!({"Concept Name": "B", "X": null, "Y": 3}),
            ])
        );
        let fields = base.fields(&TableName::from("Team A Mapping Merged Table")).unwrap();
        assert_eq!(fields[0].name, "Concept Name");
    }

    #[test]
    fn second_run_is_a_noop() {
        let mut base = small_base();
        let config = config();
        let mut state = ProvisionState::NotProvisioned;
        run_target(&mut base, &config, &mut state, false).unwrap();

        let again = run_target(&mut base, &config, &mut state, false).unwrap();
        assert!(again.is_noop());
        assert_eq!(again.unchanged, 2);
        assert_eq!(again.provision, ProvisionOutcome::AlreadyProvisioned);
    }

    #[test]
    fn removed_merged_table_is_recreated_with_shared_ledger() {
        let mut base = small_base();
        let config = config();
        let merged = TableName::from("Team A Mapping Merged Table");
        let mut ledger = ProvisionLedger::new();

        let first = sync_targets(&mut base, &config, &SyncScope::All, &mut ledger, false).unwrap();
        assert_eq!(first.targets[0].provision, ProvisionOutcome::Created);
        assert_eq!(ledger.get(&merged), Some(&ProvisionState::Provisioned));

        base.tables.retain(|t| t.name != merged);

        let second = sync_targets(&mut base, &config, &SyncScope::All, &mut ledger, false).unwrap();
        let report = &second.targets[0];
        assert_eq!(report.provision, ProvisionOutcome::Created);
        assert!(report.issues.is_empty(), "unexpected issues: {:?}", report.issues);
        assert_eq!(report.inserted.written, 2);
        assert!(base.table_exists(&merged));
        assert_eq!(merged_values(&base).len(), 2);
        assert_eq!(ledger.get(&merged), Some(&ProvisionState::Provisioned));
    }

    #[test]
    fn upstream_removal_deletes_stale_row() {
        let mut base = small_base();
        let config = config();
        let mut state = ProvisionState::NotProvisioned;
        run_target(&mut base, &config, &mut state, false).unwrap();

        let mapping = TableName::from("Team A Mapping");
        let b_id = base
            .records(&mapping)
            .unwrap()
            .into_iter()
            .find(|r| r.fields.get("Concept Name") == Some(&json!("B")))
            .unwrap()
            .id;
        base.delete_records(&mapping, &[b_id]).unwrap();

        let report = run_target(&mut base, &config, &mut state, false).unwrap();
        assert_eq!(report.deleted.written, 1);
        assert_eq!(report.inserted.written, 0);
        assert_eq!(
            merged_values(&base),
            rows(vec![json!({"Concept Name": "A", "X": 1, "Y": 2})])
        );
    }

    #[test]
    fn dry_run_on_fresh_base_writes_nothing() {
        let mut base = small_base();
        let before = base.clone();
        let config = config();
        let mut state = ProvisionState::NotProvisioned;
        let report = run_target(&mut base, &config, &mut state, true).unwrap();
        assert_eq!(report.provision, ProvisionOutcome::WouldCreate);
        assert_eq!(report.inserted.would_write, 2);
        assert_eq!(base, before);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut base = small_base();
        let err = sync_targets(
            &mut base,
            &config(),
            &SyncScope::Target("Nope".into()),
            &mut ProvisionLedger::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::UnknownTarget(name) if name == "Nope"));
    }

    #[test]
    fn missing_mapping_table_fails_only_that_target() {
        let mut base = small_base();
        let config = SyncConfig {
            targets: vec![
                TargetConfig::new("Missing Mapping"),
                TargetConfig::new("Team A Mapping"),
            ],
            ..SyncConfig::default()
        };
        let mut ledger = ProvisionLedger::new();
        let report = sync_targets(&mut base, &config, &SyncScope::All, &mut ledger, false).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].mapping_table, TableName::from("Missing Mapping"));
        assert_eq!(report.targets.len(), 1);
    }

    #[test]
    fn run_saves_base_and_state() {
        let home = TempDir::new().unwrap();
        let cfg = config::init_at(home.path(), None).unwrap();
        let base_path = cfg.base_path_at(home.path());
        base::save(&base_path, &base::sample()).unwrap();

        let mut ledger = ProvisionLedger::new();
        let report = run(home.path(), SyncScope::All, false, &mut ledger).unwrap();
        assert_eq!(report.targets.len(), 2);
        assert!(report.failures.is_empty());

        let saved = base::load(&base_path).unwrap();
        assert!(saved.table_exists(&TableName::from("Team A Mapping Merged Table")));
        let st = state::load_at(home.path(), "Team A Mapping").unwrap().unwrap();
        assert_eq!(st.rows, 2);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn noop_run_does_not_rewrite_base_file() {
        let home = TempDir::new().unwrap();
        let cfg = config::init_at(home.path(), None).unwrap();
        let base_path = cfg.base_path_at(home.path());
        base::save(&base_path, &base::sample()).unwrap();
        run(home.path(), SyncScope::All, false, &mut ProvisionLedger::new()).unwrap();

        // Compact form differs from what `base::save` writes.
        let compact = serde_json::to_string(&base::load(&base_path).unwrap()).unwrap();
        std::fs::write(&base_path, &compact).unwrap();

        let report = run(home.path(), SyncScope::All, false, &mut ProvisionLedger::new()).unwrap();
        assert!(report.targets.iter().all(TargetReport::is_noop));
        assert_eq!(std::fs::read_to_string(&base_path).unwrap(), compact);
    }

    #[test]
    fn dry_run_leaves_base_file_and_state_alone() {
        let home = TempDir::new().unwrap();
        let cfg = config::init_at(home.path(), None).unwrap();
        let base_path = cfg.base_path_at(home.path());
        base::save(&base_path, &base::sample()).unwrap();
        let before = std::fs::read_to_string(&base_path).unwrap();

        run(home.path(), SyncScope::All, true, &mut ProvisionLedger::new()).unwrap();
        assert_eq!(std::fs::read_to_string(&base_path).unwrap(), before);
        assert!(state::load_at(home.path(), "Team A Mapping").unwrap().is_none());
    }
}
