//! Destination table provisioning.

use std::collections::HashSet;

use serde::Serialize;

use basemerge_core::{FieldDescriptor, ProvisionState, StoreError, TableName, TableStore};

use crate::issue::{self, Operation, SyncIssue};

/// What [`provision`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The caller's state already said `Provisioned` and the table is there.
    AlreadyProvisioned,
    /// The table was already there.
    Existing,
    Created,
    /// The create permission check said no.
    Denied,
    /// Dry run: the table is missing and would be created.
    WouldCreate,
}

impl ProvisionOutcome {
    /// Whether the destination table can be read after provisioning.
    pub fn table_ready(self) -> bool {
        matches!(
            self,
            ProvisionOutcome::AlreadyProvisioned
                | ProvisionOutcome::Existing
                | ProvisionOutcome::Created
        )
    }
}

/// Field set for a new destination table.
///
/// Store-assigned field and choice ids are dropped, fields are deduplicated
/// by name (the last descriptor with a name wins and keeps its position) and
/// `key` is moved to the front.
pub fn prepare_fields(fields: &[FieldDescriptor], key: &str) -> Vec<FieldDescriptor> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(fields.len());
    let mut out: Vec<FieldDescriptor> = Vec::with_capacity(fields.len());
    for field in fields.iter().rev() {
        if !seen.insert(field.name.as_str()) {
            continue;
        }
        let mut field = field.clone();
        field.id = None;
        if let Some(options) = field.options.as_mut() {
            for choice in &mut options.choices {
                choice.id = None;
            }
        }
        out.push(field);
    }
    out.reverse();
    // Stable: everything but the key keeps its order.
    out.sort_by_key(|f| f.name != key);
    out
}

/// Make sure `table` exists, creating it from `fields` when missing.
///
/// `state` is set to `Provisioned` once the table is known to exist. A
/// `Provisioned` state whose table has since gone is reset and the table is
/// created again. A denied permission is recorded as an issue and leaves
/// `state` untouched.
pub fn provision<S: TableStore + ?Sized>(
    store: &mut S,
    table: &TableName,
    fields: &[FieldDescriptor],
    key: &str,
    state: &mut ProvisionState,
    dry_run: bool,
    issues: &mut Vec<SyncIssue>,
) -> Result<ProvisionOutcome, StoreError> {
    let exists = store.table_exists(table);
    if *state == ProvisionState::Provisioned {
        if exists {
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }
        tracing::warn!("destination '{}' disappeared; provisioning again", table);
        *state = ProvisionState::NotProvisioned;
    }
    if exists {
        tracing::debug!("destination '{}' already exists", table);
        *state = ProvisionState::Provisioned;
        return Ok(ProvisionOutcome::Existing);
    }

    let fields = prepare_fields(fields, key);
    if !store.can_create_table(table, &fields) {
        issue::record(
            issues,
            SyncIssue::PermissionDenied {
                table: table.clone(),
                operation: Operation::CreateTable,
            },
        );
        return Ok(ProvisionOutcome::Denied);
    }
    if dry_run {
        tracing::info!("[dry-run] would create table '{}' with {} field(s)", table, fields.len());
        return Ok(ProvisionOutcome::WouldCreate);
    }

    let count = fields.len();
    store.create_table(table, fields)?;
    *state = ProvisionState::Provisioned;
    tracing::info!("created table '{}' with {} field(s)", table, count);
    Ok(ProvisionOutcome::Created)
}
