use crate::data::table::PreparedBatch;
use crate::data::{Row, Table, TableError, TableSchema, TableStats, WriteMode};
use dashmap::DashMap;
use std::sync::Arc;

/// Main storage engine managing all tables
pub struct StorageEngine {
    /// Tables indexed by name
    tables: DashMap<String, Arc<Table>>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Create a new table from a schema
    pub fn create_table(&self, schema: TableSchema) -> Result<Arc<Table>, StorageError> {
        let name = schema.name.clone();

        if self.tables.contains_key(&name) {
            return Err(StorageError::TableExists(name));
        }

        let table = Arc::new(Table::new(schema)?);
        self.tables.insert(name, Arc::clone(&table));

        Ok(table)
    }

    /// Create the table unless one with the same name exists.
    ///
    /// An existing table must carry an identical schema.
    pub fn ensure_table(&self, schema: TableSchema) -> Result<Arc<Table>, StorageError> {
        if let Some(existing) = self.get_table(&schema.name) {
            if existing.schema != schema {
                return Err(StorageError::SchemaMismatch(schema.name));
            }
            return Ok(existing);
        }

        match self.create_table(schema.clone()) {
            Err(StorageError::TableExists(_)) => self
                .get_table(&schema.name)
                .ok_or(StorageError::TableNotFound(schema.name)),
            other => other,
        }
    }

    /// Get an existing table
    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).map(|t| Arc::clone(&t))
    }

    /// List all table names
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Insert a batch; any key conflict rejects the whole batch
    pub fn insert_batch(&self, table_name: &str, rows: Vec<Row>) -> Result<usize, StorageError> {
        self.write_batch(table_name, rows, WriteMode::Insert)
    }

    /// Insert or replace a batch keyed by primary key
    pub fn upsert_batch(&self, table_name: &str, rows: Vec<Row>) -> Result<usize, StorageError> {
        self.write_batch(table_name, rows, WriteMode::Upsert)
    }

    /// Write batches to several tables as one unit. Every batch is validated
    /// and key-checked under all the tables' write locks before any row is
    /// applied, so either every batch lands or none does. A table may appear
    /// only once.
    pub fn write_batches(
        &self,
        batches: Vec<(&str, Vec<Row>, WriteMode)>,
    ) -> Result<usize, StorageError> {
        let mut prepared: Vec<(Arc<Table>, PreparedBatch)> = Vec::with_capacity(batches.len());

        for (name, rows, mode) in batches {
            if prepared.iter().any(|(table, _)| table.name() == name) {
                return Err(StorageError::RepeatedTable(name.to_string()));
            }
            let table = self
                .get_table(name)
                .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
            let batch = table.prepare_batch(rows, mode)?;
            prepared.push((table, batch));
        }

        // Locks are always taken in name order
        prepared.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        let (tables, batches): (Vec<Arc<Table>>, Vec<PreparedBatch>) = prepared.into_iter().unzip();

        let mut guards: Vec<_> = tables.iter().map(|t| t.lock()).collect();
        for (batch, guard) in batches.iter().zip(&guards) {
            batch.check(guard)?;
        }

        let mut written = 0;
        for (batch, guard) in batches.into_iter().zip(guards.iter_mut()) {
            written += batch.apply(guard);
        }
        tracing::trace!(tables = tables.len(), rows = written, "Batches written");

        Ok(written)
    }

    fn write_batch(
        &self,
        table_name: &str,
        rows: Vec<Row>,
        mode: WriteMode,
    ) -> Result<usize, StorageError> {
        let table = self
            .get_table(table_name)
            .ok_or_else(|| StorageError::TableNotFound(table_name.to_string()))?;

        let written = table.write_batch(rows, mode)?;
        tracing::trace!(table = table_name, rows = written, ?mode, "Batch written");

        Ok(written)
    }

    /// Get table statistics
    pub fn table_stats(&self, name: &str) -> Option<TableStats> {
        self.tables.get(name).map(|t| t.stats())
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' appears twice in one write")]
    RepeatedTable(String),

    #[error("Table '{0}' exists with a different schema")]
    SchemaMismatch(String),

    #[error("Table error: {0}")]
    TableError(#[from] TableError),
}
