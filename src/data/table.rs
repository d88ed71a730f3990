use super::value::{DataType, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A single row, keyed by column name
pub type Row = HashMap<String, Value>;

/// Primary key values in schema order
pub type RowKey = Vec<Value>;

/// Column declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Schema for a keyed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
    /// Columns forming the primary key
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Check that every key column is declared and non-nullable
    pub fn validate(&self) -> Result<(), TableError> {
        if self.primary_key.is_empty() {
            return Err(TableError::MissingPrimaryKey(self.name.clone()));
        }
        for key in &self.primary_key {
            match self.column(key) {
                Some(col) if !col.nullable => {}
                Some(_) => return Err(TableError::NullableKey(key.clone())),
                None => return Err(TableError::UnknownColumn(key.clone())),
            }
        }
        Ok(())
    }
}

/// How a batch treats rows whose key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Reject the whole batch on a key conflict
    Insert,
    /// Replace existing rows with the same key
    Upsert,
}

/// A keyed relational table.
///
/// Rows are held in primary-key order. A batch write validates every row
/// before touching storage and applies under a single write lock, so a batch
/// is either fully visible or not at all.
#[derive(Debug)]
pub struct Table {
    pub schema: TableSchema,
    rows: RwLock<BTreeMap<RowKey, Row>>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self, TableError> {
        schema.validate()?;
        Ok(Self {
            schema,
            rows: RwLock::new(BTreeMap::new()),
        })
    }

    /// Get the name of this table
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Write a batch of rows atomically. Returns the number of rows written.
    pub fn write_batch(&self, rows: Vec<Row>, mode: WriteMode) -> Result<usize, TableError> {
        let batch = self.prepare_batch(rows, mode)?;
        let mut stored = self.lock();
        batch.check(&stored)?;
        Ok(batch.apply(&mut stored))
    }

    /// Type-check a batch and catch keys repeated inside it, without
    /// touching storage
    pub(crate) fn prepare_batch(
        &self,
        rows: Vec<Row>,
        mode: WriteMode,
    ) -> Result<PreparedBatch, TableError> {
        let mut prepared = Vec::with_capacity(rows.len());
        let mut seen = HashSet::new();

        for row in rows {
            let (key, row) = self.prepare_row(row)?;
            if !seen.insert(key.clone()) && mode == WriteMode::Insert {
                return Err(TableError::DuplicateKey(format_key(&key)));
            }
            prepared.push((key, row));
        }

        Ok(PreparedBatch {
            mode,
            rows: prepared,
        })
    }

    pub(crate) fn lock(&self) -> RwLockWriteGuard<'_, BTreeMap<RowKey, Row>> {
        self.rows.write()
    }

    /// Insert a single row
    #[cfg(test)]
    pub fn insert_row(&self, row: Row) -> Result<(), TableError> {
        self.write_batch(vec![row], WriteMode::Insert).map(|_| ())
    }

    /// Look up a row by primary key
    pub fn get(&self, key: &[Value]) -> Option<Row> {
        self.rows.read().get(key).cloned()
    }

    /// Read access to all rows in key order
    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RowKey, Row>> {
        self.rows.read()
    }

    /// Clone every row (used by snapshots)
    pub fn all_rows(&self) -> Vec<Row> {
        self.rows.read().values().cloned().collect()
    }

    /// Total row count
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Type-check a row against the schema and extract its key
    fn prepare_row(&self, mut row: Row) -> Result<(RowKey, Row), TableError> {
        if let Some(unknown) = row.keys().find(|name| self.schema.column(name).is_none()) {
            return Err(TableError::UnknownColumn(unknown.clone()));
        }

        let mut checked = HashMap::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            let value = row.remove(&column.name).unwrap_or(Value::Null);
            let type_name = value.type_name();
            let value = column
                .data_type
                .coerce(value)
                .ok_or_else(|| TableError::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.data_type,
                    found: type_name,
                })?;
            if value.is_null() && !column.nullable {
                return Err(TableError::NullValue(column.name.clone()));
            }
            checked.insert(column.name.clone(), value);
        }

        let key = self
            .schema
            .primary_key
            .iter()
            .map(|name| checked.get(name).cloned().unwrap_or(Value::Null))
            .collect();

        Ok((key, checked))
    }
}

/// Rows checked against a table's schema, waiting to be applied
pub(crate) struct PreparedBatch {
    mode: WriteMode,
    rows: Vec<(RowKey, Row)>,
}

impl PreparedBatch {
    /// Reject an insert whose keys are already stored
    pub(crate) fn check(&self, stored: &BTreeMap<RowKey, Row>) -> Result<(), TableError> {
        if self.mode == WriteMode::Insert {
            if let Some((key, _)) = self.rows.iter().find(|(key, _)| stored.contains_key(key)) {
                return Err(TableError::DuplicateKey(format_key(key)));
            }
        }
        Ok(())
    }

    pub(crate) fn apply(self, stored: &mut BTreeMap<RowKey, Row>) -> usize {
        let written = self.rows.len();
        stored.extend(self.rows);
        written
    }
}

fn format_key(key: &[Value]) -> String {
    key.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Table '{0}' has no primary key")]
    MissingPrimaryKey(String),

    #[error("Key column '{0}' must not be nullable")]
    NullableKey(String),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: &'static str,
    },

    #[error("Column '{0}' does not accept NULL")]
    NullValue(String),

    #[error("Duplicate key ({0})")]
    DuplicateKey(String),
}

/// Statistics about a table
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableStats {
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
}

impl Table {
    pub fn stats(&self) -> TableStats {
        TableStats {
            name: self.schema.name.clone(),
            row_count: self.row_count(),
            column_count: self.schema.columns.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_schema() -> TableSchema {
        TableSchema::new("val_sign")
            .with_column(ColumnDef::new("operator_addr", DataType::String))
            .with_column(ColumnDef::new("block_height", DataType::Int64))
            .with_column(ColumnDef::new("rate", DataType::Float64).nullable())
            .with_primary_key(&["operator_addr", "block_height"])
    }

    fn make_row(addr: &str, height: i64) -> Row {
        let mut row = HashMap::new();
        row.insert("operator_addr".to_string(), Value::from(addr));
        row.insert("block_height".to_string(), Value::Int64(height));
        row
    }

    #[test]
    fn test_insert_batch() {
        let table = Table::new(sign_schema()).unwrap();
        let rows = (0..10).map(|h| make_row("val", h)).collect();

        assert_eq!(table.write_batch(rows, WriteMode::Insert).unwrap(), 10);
        assert_eq!(table.row_count(), 10);

        // Missing nullable column is filled with NULL
        let row = table.get(&[Value::from("val"), Value::Int64(3)]).unwrap();
        assert_eq!(row.get("rate"), Some(&Value::Null));
    }

    #[test]
    fn test_insert_duplicate_in_batch_is_atomic() {
        let table = Table::new(sign_schema()).unwrap();
        let rows = vec![make_row("val", 1), make_row("val", 2), make_row("val", 1)];

        assert!(matches!(
            table.write_batch(rows, WriteMode::Insert),
            Err(TableError::DuplicateKey(_))
        ));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_insert_conflict_with_stored_row_is_atomic() {
        let table = Table::new(sign_schema()).unwrap();
        table.insert_row(make_row("val", 5)).unwrap();

        let rows = vec![make_row("val", 4), make_row("val", 5)];
        assert!(table.write_batch(rows, WriteMode::Insert).is_err());
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_upsert_replaces() {
        let table = Table::new(sign_schema()).unwrap();
        table.insert_row(make_row("val", 1)).unwrap();

        let mut row = make_row("val", 1);
        row.insert("rate".to_string(), Value::Int64(1));
        table.write_batch(vec![row], WriteMode::Upsert).unwrap();

        assert_eq!(table.row_count(), 1);
        let stored = table.get(&[Value::from("val"), Value::Int64(1)]).unwrap();
        assert_eq!(stored.get("rate"), Some(&Value::Float64(1.0)));
    }

    #[test]
    fn test_type_mismatch_rejects_batch() {
        let table = Table::new(sign_schema()).unwrap();
        let mut bad = make_row("val", 2);
        bad.insert("block_height".to_string(), Value::from("two"));

        let result = table.write_batch(vec![make_row("val", 1), bad], WriteMode::Insert);
        assert!(matches!(result, Err(TableError::TypeMismatch { .. })));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_unknown_column_and_null_key() {
        let table = Table::new(sign_schema()).unwrap();

        let mut row = make_row("val", 1);
        row.insert("extra".to_string(), Value::Bool(true));
        assert!(matches!(
            table.insert_row(row),
            Err(TableError::UnknownColumn(_))
        ));

        let mut row = HashMap::new();
        row.insert("operator_addr".to_string(), Value::from("val"));
        assert!(matches!(table.insert_row(row), Err(TableError::NullValue(_))));
    }

    #[test]
    fn test_schema_requires_key() {
        let schema = TableSchema::new("t").with_column(ColumnDef::new("a", DataType::Int64));
        assert!(matches!(
            Table::new(schema),
            Err(TableError::MissingPrimaryKey(_))
        ));
    }
}
