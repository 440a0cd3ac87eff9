//! The store seam: everything the sync pipeline needs from a base.
//!
//! Every mutating call has a paired permission check. Callers must consult
//! the check immediately before the mutation and skip the call on `false`.

use crate::error::StoreError;
use crate::types::{FieldDescriptor, Record, RecordId, Row, TableName};

pub trait TableStore {
    fn table_exists(&self, table: &TableName) -> bool;

    fn fields(&self, table: &TableName) -> Result<Vec<FieldDescriptor>, StoreError>;

    fn records(&self, table: &TableName) -> Result<Vec<Record>, StoreError>;

    fn can_create_table(&self, table: &TableName, fields: &[FieldDescriptor]) -> bool;

    fn create_table(
        &mut self,
        table: &TableName,
        fields: Vec<FieldDescriptor>,
    ) -> Result<(), StoreError>;

    fn can_create_records(&self, table: &TableName, rows: &[Row]) -> bool;

    /// Create one record per row. Row identifiers are ignored; the returned
    /// ids are in row order.
    fn create_records(
        &mut self,
        table: &TableName,
        rows: &[Row],
    ) -> Result<Vec<RecordId>, StoreError>;

    fn can_delete_records(&self, table: &TableName, ids: &[RecordId]) -> bool;

    fn delete_records(&mut self, table: &TableName, ids: &[RecordId]) -> Result<(), StoreError>;
}

impl<S: TableStore + ?Sized> TableStore for &mut S {
    fn table_exists(&self, table: &TableName) -> bool {
        (**self).table_exists(table)
    }

    fn fields(&self, table: &TableName) -> Result<Vec<FieldDescriptor>, StoreError> {
        (**self).fields(table)
    }

    fn records(&self, table: &TableName) -> Result<Vec<Record>, StoreError> {
        (**self).records(table)
    }

    fn can_create_table(&self, table: &TableName, fields: &[FieldDescriptor]) -> bool {
        (**self).can_create_table(table, fields)
    }

    fn create_table(
        &mut self,
        table: &TableName,
        fields: Vec<FieldDescriptor>,
    ) -> Result<(), StoreError> {
        (**self).create_table(table, fields)
    }

    fn can_create_records(&self, table: &TableName, rows: &[Row]) -> bool {
        (**self).can_create_records(table, rows)
    }

    fn create_records(
        &mut self,
        table: &TableName,
        rows: &[Row],
    ) -> Result<Vec<RecordId>, StoreError> {
        (**self).create_records(table, rows)
    }

    fn can_delete_records(&self, table: &TableName, ids: &[RecordId]) -> bool {
        (**self).can_delete_records(table, ids)
    }

    fn delete_records(&mut self, table: &TableName, ids: &[RecordId]) -> Result<(), StoreError> {
        (**self).delete_records(table, ids)
    }
}
