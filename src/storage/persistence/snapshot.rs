//! Snapshot manager for saving and restoring every table in the engine

use super::file::FileBackend;
use super::{PersistenceBackend, PersistenceConfig, PersistenceError};
use crate::data::{Row, Table, TableSchema};
use crate::storage::StorageEngine;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

const LATEST_KEY: &str = "_latest";
const SCHEMA_VERSION: u32 = 1;

/// Snapshot metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot ID
    pub id: String,
    /// Monotonic sequence number, used for ordering
    pub sequence: u64,
    /// Creation timestamp (epoch ms)
    pub created_at: i64,
    /// Tables included in snapshot
    pub tables: Vec<String>,
    /// Total compressed size in bytes
    pub size_bytes: usize,
    /// Schema version for compatibility
    pub schema_version: u32,
}

/// Serialized table data
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct TableSnapshot {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// Manages snapshots for restart
pub struct SnapshotManager {
    backend: Box<dyn PersistenceBackend>,
    config: PersistenceConfig,
    latest_snapshot: RwLock<Option<SnapshotMetadata>>,
    next_sequence: AtomicU64,
}

impl SnapshotManager {
    /// Create a snapshot manager backed by files under `config.data_dir`
    pub fn new(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        let backend = FileBackend::new(config.clone())?;
        Self::with_backend(Box::new(backend), config)
    }

    /// Create a snapshot manager over any backend
    pub fn with_backend(
        backend: Box<dyn PersistenceBackend>,
        config: PersistenceConfig,
    ) -> Result<Self, PersistenceError> {
        let manager = Self {
            backend,
            config,
            latest_snapshot: RwLock::new(None),
            next_sequence: AtomicU64::new(0),
        };

        manager.load_latest_metadata()?;

        Ok(manager)
    }

    /// Load the latest snapshot metadata
    fn load_latest_metadata(&self) -> Result<(), PersistenceError> {
        if let Some(data) = self.backend.read(LATEST_KEY)? {
            let metadata: SnapshotMetadata = serde_json::from_slice(&data)
                .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
            self.next_sequence
                .store(metadata.sequence + 1, Ordering::SeqCst);
            *self.latest_snapshot.write() = Some(metadata);
        }
        Ok(())
    }

    /// Create a snapshot of the storage engine
    pub fn create_snapshot(
        &self,
        engine: &StorageEngine,
    ) -> Result<SnapshotMetadata, PersistenceError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let snapshot_id = format!("snapshot_{:012}", sequence);
        let tables = engine.list_tables();
        let mut total_size = 0;

        for table_name in &tables {
            if let Some(table) = engine.get_table(table_name) {
                let data = encode_table(&table)?;
                total_size += data.len();
                self.backend
                    .write(&format!("{}_{}", snapshot_id, table_name), &data)?;
            }
        }

        let metadata = SnapshotMetadata {
            id: snapshot_id.clone(),
            sequence,
            created_at: chrono::Utc::now().timestamp_millis(),
            tables,
            size_bytes: total_size,
            schema_version: SCHEMA_VERSION,
        };

        let metadata_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        self.backend
            .write(&format!("{}_meta", snapshot_id), &metadata_bytes)?;

        // Update latest pointer last so a crash mid-snapshot keeps the previous one
        self.backend.write(LATEST_KEY, &metadata_bytes)?;
        *self.latest_snapshot.write() = Some(metadata.clone());

        self.backend.sync()?;

        tracing::debug!(
            snapshot_id = %metadata.id,
            tables = metadata.tables.len(),
            size_bytes = metadata.size_bytes,
            "Snapshot written"
        );

        Ok(metadata)
    }

    /// Restore from the latest snapshot
    pub fn restore_latest(
        &self,
        engine: &StorageEngine,
    ) -> Result<Option<SnapshotMetadata>, PersistenceError> {
        let metadata = match self.latest_snapshot() {
            Some(m) => m,
            None => return Ok(None),
        };

        self.restore_snapshot(engine, &metadata.id)?;
        Ok(Some(metadata))
    }

    /// Restore a specific snapshot into the engine
    pub fn restore_snapshot(
        &self,
        engine: &StorageEngine,
        snapshot_id: &str,
    ) -> Result<(), PersistenceError> {
        let metadata_data = self
            .backend
            .read(&format!("{}_meta", snapshot_id))?
            .ok_or_else(|| PersistenceError::SnapshotNotFound(snapshot_id.to_string()))?;

        let metadata: SnapshotMetadata = serde_json::from_slice(&metadata_data)
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

        if metadata.schema_version != SCHEMA_VERSION {
            return Err(PersistenceError::Corrupted(format!(
                "unsupported snapshot schema version {}",
                metadata.schema_version
            )));
        }

        for table_name in &metadata.tables {
            let data = self
                .backend
                .read(&format!("{}_{}", snapshot_id, table_name))?
                .ok_or_else(|| {
                    PersistenceError::Corrupted(format!("missing table file for {}", table_name))
                })?;

            let snapshot = decode_table(&data)?;
            let row_count = snapshot.rows.len();

            engine
                .ensure_table(snapshot.schema)
                .map_err(|e| PersistenceError::Restore(e.to_string()))?;
            engine
                .upsert_batch(table_name, snapshot.rows)
                .map_err(|e| PersistenceError::Restore(e.to_string()))?;

            tracing::debug!(table = %table_name, rows = row_count, "Table restored");
        }

        Ok(())
    }

    /// Get the latest snapshot metadata
    pub fn latest_snapshot(&self) -> Option<SnapshotMetadata> {
        self.latest_snapshot.read().clone()
    }

    /// List all available snapshots, newest first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>, PersistenceError> {
        let keys = self.backend.list_keys()?;
        let mut snapshots = Vec::new();

        for key in keys {
            if key.ends_with("_meta") {
                if let Some(data) = self.backend.read(&key)? {
                    if let Ok(metadata) = serde_json::from_slice::<SnapshotMetadata>(&data) {
                        snapshots.push(metadata);
                    }
                }
            }
        }

        snapshots.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        Ok(snapshots)
    }

    /// Delete old snapshots, keeping the configured number of most recent ones
    pub fn cleanup_old_snapshots(&self) -> Result<usize, PersistenceError> {
        let snapshots = self.list_snapshots()?;
        let keep_count = self.config.keep_snapshots.max(1);

        let mut deleted = 0;
        for snapshot in snapshots.iter().skip(keep_count) {
            for table in &snapshot.tables {
                self.backend.delete(&format!("{}_{}", snapshot.id, table))?;
            }
            self.backend.delete(&format!("{}_meta", snapshot.id))?;
            deleted += 1;
        }

        Ok(deleted)
    }
}

fn encode_table(table: &Table) -> Result<Vec<u8>, PersistenceError> {
    let snapshot = TableSnapshot {
        schema: table.schema.clone(),
        rows: table.all_rows(),
    };
    let json = serde_json::to_vec(&snapshot)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

fn decode_table(data: &[u8]) -> Result<TableSnapshot, PersistenceError> {
    let json = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| PersistenceError::Deserialization(e.to_string()))
}
