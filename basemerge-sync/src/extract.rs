//! Table extraction: store records → [`TableSnapshot`].
//!
//! Every declared field appears on every row (null when the record has no
//! value). For nested-typed fields the store ids inside the value are
//! removed so that rows copied between tables compare equal.

use chrono::Utc;
use serde_json::Value;

use basemerge_core::{
    FieldDescriptor, Record, Row, StoreError, TableName, TableSnapshot, TableStore,
};

use crate::issue::{self, SyncIssue};

/// Snapshot `table`, stripping nested ids. Shape problems are appended to
/// `issues`.
pub fn extract<S: TableStore + ?Sized>(
    store: &S,
    table: &TableName,
    issues: &mut Vec<SyncIssue>,
) -> Result<TableSnapshot, StoreError> {
    let fields = store.fields(table)?;
    let records = store.records(table)?;

    let rows = records
        .into_iter()
        .map(|record| extract_row(table, &fields, record, issues))
        .collect::<Vec<_>>();

    tracing::debug!("extracted {} row(s) from '{}'", rows.len(), table);
    Ok(TableSnapshot {
        table: table.clone(),
        rows,
        fields,
        captured_at: Utc::now(),
    })
}

fn extract_row(
    table: &TableName,
    fields: &[FieldDescriptor],
    mut record: Record,
    issues: &mut Vec<SyncIssue>,
) -> Row {
    let mut row = Row::new().with_id(record.id.clone());
    for field in fields {
        let mut value = record.fields.remove(&field.name).unwrap_or(Value::Null);
        if field.field_type.is_nested() && !strip_nested_ids(&mut value) {
            issue::record(
                issues,
                SyncIssue::ShapeMismatch {
                    table: table.clone(),
                    field: field.name.clone(),
                    record: record.id.clone(),
                },
            );
        }
        row.set(field.name.clone(), value);
    }
    row
}

/// Remove the `id` key from an object, or from every object in an array.
///
/// Returns `false` when the value has the wrong shape for a nested field
/// (a non-null scalar, or an array holding scalars).
pub(crate) fn strip_nested_ids(value: &mut Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => {
            map.remove("id");
            true
        }
        Value::Array(items) => {
            let mut well_formed = true;
            for item in items.iter_mut() {
                match item {
                    Value::Object(map) => {
                        map.remove("id");
                    }
                    _ => well_formed = false,
                }
            }
            well_formed
        }
        _ => false,
    }
}
