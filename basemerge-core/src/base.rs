//! In-memory base and its JSON file form.
//!
//! # Storage layout
//!
//! ```text
//! ~/.basemerge/
//!   config.yaml
//!   base.json        (default location; configurable)
//! ```
//!
//! The base file holds every table with its fields and records, the
//! permission model consulted by the `can_*` checks, and the record id
//! counter. Saves use the `.tmp` sibling + rename pattern.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{io_err, StoreError};
use crate::store::TableStore;
use crate::types::{
    Choice, FieldDescriptor, FieldOptions, FieldType, Record, RecordId, Row, TableName,
};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One table: its shape and its records, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: TableName,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl Table {
    pub fn new(name: impl Into<TableName>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
            records: Vec::new(),
        }
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// What the base lets a caller mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default = "default_true")]
    pub create_tables: bool,
    /// Tables whose records may not be created or deleted.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub read_only_tables: BTreeSet<TableName>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            create_tables: true,
            read_only_tables: BTreeSet::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A whole base held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Base {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    next_record_id: u64,
}

impl Base {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &TableName) -> Option<&Table> {
        self.tables.iter().find(|t| &t.name == name)
    }

    fn table_mut(&mut self, name: &TableName) -> Result<&mut Table, StoreError> {
        self.tables
            .iter_mut()
            .find(|t| &t.name == name)
            .ok_or_else(|| StoreError::TableNotFound(name.clone()))
    }

    /// Add a table together with its records; record ids are allocated here.
    pub fn insert_table(
        &mut self,
        name: impl Into<TableName>,
        fields: Vec<FieldDescriptor>,
        rows: Vec<Row>,
    ) -> Result<Vec<RecordId>, StoreError> {
        let name = name.into();
        self.create_table(&name, fields)?;
        self.create_records(&name, &rows)
    }

    /// Allocate `count` fresh record ids.
    fn allocate_ids(&mut self, count: usize) -> Vec<RecordId> {
        // Hand-edited base files may already use ids from the counter's range.
        let used: HashSet<&str> = self
            .tables
            .iter()
            .flat_map(|t| t.records.iter().map(|r| r.id.0.as_str()))
            .collect();
        let mut next = self.next_record_id;
        let mut ids = Vec::with_capacity(count);
        while ids.len() < count {
            next += 1;
            let id = format!("rec{next:08}");
            if !used.contains(id.as_str()) {
                ids.push(RecordId(id));
            }
        }
        self.next_record_id = next;
        ids
    }

    fn is_read_only(&self, table: &TableName) -> bool {
        self.permissions.read_only_tables.contains(table)
    }
}

impl TableStore for Base {
    fn table_exists(&self, table: &TableName) -> bool {
        self.table(table).is_some()
    }

    fn fields(&self, table: &TableName) -> Result<Vec<FieldDescriptor>, StoreError> {
        self.table(table)
            .map(|t| t.fields.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    fn records(&self, table: &TableName) -> Result<Vec<Record>, StoreError> {
        self.table(table)
            .map(|t| t.records.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    fn can_create_table(&self, table: &TableName, _fields: &[FieldDescriptor]) -> bool {
        self.permissions.create_tables && !self.table_exists(table)
    }

    fn create_table(
        &mut self,
        table: &TableName,
        fields: Vec<FieldDescriptor>,
    ) -> Result<(), StoreError> {
        if self.table_exists(table) {
            return Err(StoreError::TableExists(table.clone()));
        }
        self.tables.push(Table::new(table.clone(), fields));
        Ok(())
    }

    fn can_create_records(&self, table: &TableName, _rows: &[Row]) -> bool {
        self.table_exists(table) && !self.is_read_only(table)
    }

    fn create_records(
        &mut self,
        table: &TableName,
        rows: &[Row],
    ) -> Result<Vec<RecordId>, StoreError> {
        {
            let target = self
                .table(table)
                .ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
            for row in rows {
                if let Some(field) = row.fields.keys().find(|name| !target.has_field(name)) {
                    return Err(StoreError::UnknownField {
                        table: table.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let created: Vec<Record> = self
            .allocate_ids(rows.len())
            .into_iter()
            .zip(rows)
            .map(|(id, row)| Record {
                id,
                fields: row.fields.clone(),
            })
            .collect();
        let ids = created.iter().map(|r| r.id.clone()).collect();
        self.table_mut(table)?.records.extend(created);
        Ok(ids)
    }

    fn can_delete_records(&self, table: &TableName, _ids: &[RecordId]) -> bool {
        self.table_exists(table) && !self.is_read_only(table)
    }

    fn delete_records(&mut self, table: &TableName, ids: &[RecordId]) -> Result<(), StoreError> {
        let target = self.table_mut(table)?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !target.records.iter().any(|r| &r.id == *id))
        {
            return Err(StoreError::RecordNotFound {
                table: table.clone(),
                id: missing.clone(),
            });
        }
        target.records.retain(|r| !ids.contains(&r.id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File form
// ---------------------------------------------------------------------------

/// Load a base from its JSON file.
///
/// Returns `StoreError::BaseNotFound` if absent, `StoreError::Json` (with
/// path) if malformed.
pub fn load(path: &Path) -> Result<Base, StoreError> {
    if !path.exists() {
        return Err(StoreError::BaseNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically save a base: serialize → `.json.tmp` sibling → rename.
pub fn save(path: &Path, base: &Base) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(base).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

/// A small base with a source table and two team mapping tables, matching
/// the default configuration.
pub fn sample() -> Base {
    let mut base = Base::new();

    let category = FieldDescriptor {
        id: Some("fldCategory".to_string()),
        name: "Category".to_string(),
        description: Some("Product family".to_string()),
        field_type: FieldType::SingleSelect,
        options: Some(FieldOptions {
            choices: vec![
                Choice {
                    id: Some("selFootwear".to_string()),
                    name: "Footwear".to_string(),
                    color: Some("blueLight2".to_string()),
                },
                Choice {
                    id: Some("selApparel".to_string()),
                    name: "Apparel".to_string(),
                    color: Some("greenLight2".to_string()),
                },
            ],
            ..FieldOptions::default()
        }),
    };
    let source_fields = vec![
        FieldDescriptor::new("Concept Name", FieldType::SingleLineText),
        category,
        FieldDescriptor::new("Launch Year", FieldType::Number),
    ];
    let footwear = json!({"id": "selFootwear", "name": "Footwear", "color": "blueLight2"});
    let apparel = json!({"id": "selApparel", "name": "Apparel", "color": "greenLight2"});
    let source_rows = vec![
        sample_row(json!({
            "Concept Name": "Trail Runner",
            "Category": footwear,
            "Launch Year": 2021,
        })),
        sample_row(json!({
            "Concept Name": "Court Classic",
            "Category": footwear,
            "Launch Year": 2019,
        })),
        sample_row(json!({
            "Concept Name": "Storm Shell",
            "Category": apparel,
            "Launch Year": 2022,
        })),
    ];

    let team_a_fields = vec![
        FieldDescriptor::new("Concept Name", FieldType::SingleLineText),
        FieldDescriptor::new("Team A Owner", FieldType::SingleLineText),
    ];
    let team_a_rows = vec![
        sample_row(json!({"Concept Name": "Trail Runner", "Team A Owner": "Dana"})),
        sample_row(json!({"Concept Name": "Storm Shell", "Team A Owner": "Lee"})),
    ];

    let team_b_fields = vec![
        FieldDescriptor::new("Concept Name", FieldType::SingleLineText),
        FieldDescriptor::new("Team B Region", FieldType::SingleLineText),
        FieldDescriptor::new("Team B Tags", FieldType::MultipleSelects)
            .with_choices(["core", "seasonal"]),
    ];
    let team_b_rows = vec![
        sample_row(json!({
            "Concept Name": "Court Classic",
            "Team B Region": "EMEA",
            "Team B Tags": [{"id": "selCore", "name": "core"}]
        })),
        sample_row(json!({
            "Concept Name": "Prototype X",
            "Team B Region": "APAC",
            "Team B Tags": [{"id": "selSeasonal", "name": "seasonal"}]
        })),
    ];

    // Table names are unique and every row only uses declared fields, so
    // these inserts cannot fail on a fresh base.
    for (name, fields, rows) in [
        ("Source Data", source_fields, source_rows),
        ("Team A Mapping", team_a_fields, team_a_rows),
        ("Team B Mapping", team_b_fields, team_b_rows),
    ] {
        let _ = base.insert_table(name, fields, rows);
    }
    base
}

fn sample_row(value: serde_json::Value) -> Row {
    Row::from_json(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
