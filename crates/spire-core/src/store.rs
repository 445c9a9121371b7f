//! Persistence of registry snapshots
//!
//! A snapshot is the whole registry plus the number of the last block
//! applied to it. Stores load and save snapshots whole; there is no partial
//! write of individual entries.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::registry::DappEntry;
use crate::Result;

/// Persisted engine state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of the last block applied
    pub cursor: u64,
    pub dapps: BTreeMap<String, DappEntry>,
}

/// Where snapshots live between runs
pub trait StateStore: Send + Sync {
    /// The last saved snapshot, if any
    fn load(&self) -> Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Pretty JSON file, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_file_atomic_durable(&self.path, &bytes)?;
        tracing::debug!(path = %self.path.display(), cursor = snapshot.cursor, "state saved");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_file_atomic_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = path.with_extension("tmp");
    let mut f = File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    sync_directory(parent)
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of whatever was saved last
    pub fn saved(&self) -> Option<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.saved())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut dapps = BTreeMap::new();
        dapps.insert(
            "counter".to_string(),
            DappEntry {
                program: "return storage;".into(),
                storage: Value::from_json(&serde_json::json!({"count": 2})),
                provisioned: true,
            },
        );
        Snapshot { cursor: 120, dapps }
    }

    #[test]
    fn test_json_store_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[test]
    fn test_json_store_file_format() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["cursor"], 120);
        assert_eq!(raw["dapps"]["counter"]["storage"]["count"], 2);
        assert_eq!(raw["dapps"]["counter"]["provisioned"], true);
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStore::new(path).load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&sample()).unwrap();
        assert_eq!(store.saved(), Some(sample()));
    }
}
