pub mod engine;
pub mod persistence;

pub use engine::{StorageEngine, StorageError};
pub use persistence::{PersistenceBackend, PersistenceConfig, PersistenceError, SnapshotManager};
