//! JSON snapshot of the whole store for restarts

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::alerts::summarizer::ModelProfile;
use crate::alerts::{Monitor, NotificationChannel};
use crate::datasource::Datasource;
use crate::query::history::QueryHistory;

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Every table, each in ascending id order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub datasources: Vec<Datasource>,
    pub monitors: Vec<Monitor>,
    pub channels: Vec<NotificationChannel>,
    pub models: Vec<ModelProfile>,
    pub history: Vec<QueryHistory>,
}

/// Snapshot file on disk. Each write replaces the file atomically; callers
/// serialize concurrent writers.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, or `None` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let snapshot: Snapshot = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Persistence(format!("corrupt snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    /// Write to a sibling temp file, sync, then rename over the snapshot.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persistence)?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(persistence)?;
        file.write_all(&bytes).map_err(persistence)?;
        file.sync_all().map_err(persistence)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(persistence)
    }
}

fn persistence(e: std::io::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("state.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("state.json"));

        let mut ds = Datasource::new("loki", EngineKind::Loki, "http://loki:3100");
        ds.id = 7;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            datasources: vec![ds.clone()],
            ..Default::default()
        };
        file.write(&snapshot).unwrap();

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.datasources, vec![ds]);
        assert!(!file.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{broken").unwrap();
        assert!(SnapshotFile::new(path).load().is_err());
    }
}
