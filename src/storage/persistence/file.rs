//! Plain file backend: one file per key under the data directory

use super::{PersistenceBackend, PersistenceConfig, PersistenceError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

const EXTENSION: &str = "snap";

/// File-per-key persistence backend
pub struct FileBackend {
    config: PersistenceConfig,
}

impl FileBackend {
    /// Create a new file backend, creating the data directory if needed
    pub fn new(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.{}", key, EXTENSION))
    }
}

impl PersistenceBackend for FileBackend {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        let path = self.key_path(key);
        let tmp_path = path.with_extension(format!("{}.tmp", EXTENSION));

        // Write beside the target and rename so readers never see a torn file
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &path)?;

        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.key_path(key);

        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(std::fs::read(path)?))
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.key_path(key);

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, PersistenceError> {
        let mut keys = Vec::new();

        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let path = entry?.path();

            if path.extension().map(|ext| ext == EXTENSION).unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }

    fn sync(&self) -> Result<(), PersistenceError> {
        // Directory fsync makes the renames durable
        File::open(&self.config.data_dir)?.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap();

        backend.write("test_key", b"validator rows").unwrap();

        let read_data = backend.read("test_key").unwrap().unwrap();
        assert_eq!(read_data, b"validator rows");
        assert!(backend.read("missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_and_list_keys() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap();

        backend.write("key1", b"old").unwrap();
        backend.write("key1", b"new").unwrap();
        backend.write("key2", b"data2").unwrap();

        let mut keys = backend.list_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["key1".to_string(), "key2".to_string()]);
        assert_eq!(backend.read("key1").unwrap().unwrap(), b"new");
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap();

        backend.write("to_delete", b"data").unwrap();
        backend.delete("to_delete").unwrap();
        assert!(backend.read("to_delete").unwrap().is_none());
        backend.delete("to_delete").unwrap();
    }

    #[test]
    fn test_write_renames_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap();

        backend.write("cosmos_1", b"rows").unwrap();
        backend.sync().unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cosmos_1.snap".to_string()]);
    }
}
