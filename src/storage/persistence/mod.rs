//! Snapshot persistence so the monitor resumes from where it stopped

pub mod file;
pub mod snapshot;

pub use file::FileBackend;
pub use snapshot::{SnapshotManager, SnapshotMetadata};

use std::path::Path;

/// Trait for persistence backends
pub trait PersistenceBackend: Send + Sync {
    /// Write data to persistence
    fn write(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError>;

    /// Read data from persistence
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Delete data from persistence
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// List all keys
    fn list_keys(&self) -> Result<Vec<String>, PersistenceError>;

    /// Sync to disk
    fn sync(&self) -> Result<(), PersistenceError>;
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Base directory for snapshot files
    pub data_dir: std::path::PathBuf,
    /// Number of snapshots kept after each save
    pub keep_snapshots: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: std::path::PathBuf::from("./valmon_data"),
            keep_snapshots: 3,
        }
    }
}

impl PersistenceConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_keep_snapshots(mut self, keep: usize) -> Self {
        self.keep_snapshots = keep.max(1);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Restore failed: {0}")]
    Restore(String),
}
