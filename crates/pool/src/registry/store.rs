//! Persisted container registry

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::worker::ConfigSignature;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A running container that backs a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub container_id: String,
    pub host_port: u16,
    pub signature: ConfigSignature,
    pub created_at: DateTime<Utc>,
}

impl RegistryRecord {
    pub fn new(container_id: impl Into<String>, host_port: u16, signature: ConfigSignature) -> Self {
        Self {
            container_id: container_id.into(),
            host_port,
            signature,
            created_at: Utc::now(),
        }
    }
}

/// Container records keyed by container id, optionally mirrored to disk
///
/// Every mutation rewrites the file as one line of JSON via a temp file and
/// rename, so a crash never leaves a half-written registry behind.
///
/// The records lock is only held while mutating and serialising; the disk
/// write happens after it is released. Snapshots are versioned so a slow
/// writer never overwrites a newer file.
pub struct WorkerRegistry {
    records: Mutex<BTreeMap<String, RegistryRecord>>,
    path: Option<PathBuf>,
    version: AtomicU64,
    /// Version of the last snapshot on disk; serialises file writes
    written: Mutex<u64>,
}

/// Serialised registry contents awaiting a disk write
struct Snapshot {
    version: u64,
    bytes: Vec<u8>,
    records: usize,
}

impl WorkerRegistry {
    /// Load the registry at `path`; a missing file is an empty registry
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();

        let records = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => {
                let list: Vec<RegistryRecord> = serde_json::from_str(&contents)?;
                list.into_iter()
                    .map(|record| (record.container_id.clone(), record))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = records.len(), "Opened worker registry");
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path),
            version: AtomicU64::new(0),
            written: Mutex::new(0),
        })
    }

    /// A registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            path: None,
            version: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, container_id: &str) -> Option<RegistryRecord> {
        self.records.lock().get(container_id).cloned()
    }

    /// Records for one signature, oldest first
    pub fn find_by_signature(&self, signature: &ConfigSignature) -> Vec<RegistryRecord> {
        let mut found: Vec<RegistryRecord> = self
            .records
            .lock()
            .values()
            .filter(|record| &record.signature == signature)
            .cloned()
            .collect();
        found.sort_by_key(|record| record.created_at);
        found
    }

    /// Add or replace a record and persist
    pub fn insert(&self, record: RegistryRecord) -> Result<(), RegistryError> {
        let snapshot = {
            let mut records = self.records.lock();
            records.insert(record.container_id.clone(), record);
            self.snapshot(&records)?
        };
        self.persist(snapshot)
    }

    /// Remove a record and persist; returns the removed record
    pub fn remove(&self, container_id: &str) -> Result<Option<RegistryRecord>, RegistryError> {
        let (removed, snapshot) = {
            let mut records = self.records.lock();
            match records.remove(container_id) {
                Some(record) => (Some(record), self.snapshot(&records)?),
                None => (None, None),
            }
        };
        self.persist(snapshot)?;
        Ok(removed)
    }

    /// Remove every record for a signature and persist
    pub fn remove_signature(
        &self,
        signature: &ConfigSignature,
    ) -> Result<Vec<RegistryRecord>, RegistryError> {
        let (removed, snapshot) = {
            let mut records = self.records.lock();
            let ids: Vec<String> = records
                .values()
                .filter(|record| &record.signature == signature)
                .map(|record| record.container_id.clone())
                .collect();

            let removed: Vec<RegistryRecord> =
                ids.iter().filter_map(|id| records.remove(id)).collect();
            let snapshot = if removed.is_empty() {
                None
            } else {
                self.snapshot(&records)?
            };
            (removed, snapshot)
        };
        self.persist(snapshot)?;
        Ok(removed)
    }

    /// Every record, ordered by container id
    pub fn records(&self) -> Vec<RegistryRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Host ports claimed by registered containers
    pub fn used_ports(&self) -> BTreeSet<u16> {
        self.records
            .lock()
            .values()
            .map(|record| record.host_port)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Serialise the current records; called with the records lock held
    fn snapshot(
        &self,
        records: &BTreeMap<String, RegistryRecord>,
    ) -> Result<Option<Snapshot>, RegistryError> {
        if self.path.is_none() {
            return Ok(None);
        }

        let list: Vec<&RegistryRecord> = records.values().collect();
        let mut bytes = serde_json::to_vec(&list)?;
        bytes.push(b'\n');

        Ok(Some(Snapshot {
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
            bytes,
            records: records.len(),
        }))
    }

    /// Write a snapshot unless a newer one already reached the disk
    fn persist(&self, snapshot: Option<Snapshot>) -> Result<(), RegistryError> {
        let (Some(path), Some(snapshot)) = (&self.path, snapshot) else {
            return Ok(());
        };

        let mut written = self.written.lock();
        if *written >= snapshot.version {
            debug!(version = snapshot.version, "Skipping superseded registry snapshot");
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file, then rename over the real one
        let temp_path = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            writer.write_all(&snapshot.bytes)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        *written = snapshot.version;

        info!(path = %path.display(), records = snapshot.records, "Persisted worker registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn signature(tag: &str) -> ConfigSignature {
        ConfigSignature::of_value(&json!({ "tag": tag }))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let registry = WorkerRegistry::open(dir.path().join("registry.json")).unwrap();
        assert!(registry.is_empty());
        assert!(!dir.path().join("registry.json").exists(), "open never writes");
    }

    #[test]
    fn test_round_trip_through_fresh_instance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let registry = WorkerRegistry::open(&path).unwrap();
        registry
            .insert(RegistryRecord::new("c-1", 9001, signature("a")))
            .unwrap();
        registry
            .insert(RegistryRecord::new("c-2", 9002, signature("b")))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim_end().lines().count(), 1);
        assert!(!path.with_extension("tmp").exists());

        let reopened = WorkerRegistry::open(&path).unwrap();
        assert_eq!(reopened.records(), registry.records());
        assert_eq!(reopened.get("c-2").unwrap().host_port, 9002);
        assert_eq!(reopened.used_ports(), BTreeSet::from([9001, 9002]));
    }

    #[test]
    fn test_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = WorkerRegistry::open(&path).unwrap();
        registry
            .insert(RegistryRecord::new("c-1", 9001, signature("a")))
            .unwrap();
        assert!(registry.remove("c-1").unwrap().is_some());
        assert!(registry.remove("c-1").unwrap().is_none());

        assert!(WorkerRegistry::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_signature_queries() {
        let registry = WorkerRegistry::in_memory();
        registry
            .insert(RegistryRecord::new("c-1", 9001, signature("a")))
            .unwrap();
        registry
            .insert(RegistryRecord::new("c-2", 9002, signature("a")))
            .unwrap();
        registry
            .insert(RegistryRecord::new("c-3", 9003, signature("b")))
            .unwrap();

        assert_eq!(registry.find_by_signature(&signature("a")).len(), 2);

        let removed = registry.remove_signature(&signature("a")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.path().is_none());
    }

    #[test]
    fn test_concurrent_writers_leave_latest_state_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = std::sync::Arc::new(WorkerRegistry::open(&path).unwrap());

        let writers: Vec<_> = (0..8u16)
            .map(|thread| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    for n in 0..10u16 {
                        let id = format!("c-{thread}-{n}");
                        registry
                            .insert(RegistryRecord::new(&id, 9000 + thread * 10 + n, signature("a")))
                            .unwrap();
                        if n % 2 == 1 {
                            registry.remove(&id).unwrap();
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(registry.len(), 40);
        let reopened = WorkerRegistry::open(&path).unwrap();
        assert_eq!(reopened.records(), registry.records());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        // The temp file cannot be created where a directory already exists
        fs::create_dir(path.with_extension("tmp")).unwrap();

        let registry = WorkerRegistry::open(&path).unwrap();
        let err = registry
            .insert(RegistryRecord::new("c-1", 9001, signature("a")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Io(_)));
        assert_eq!(registry.len(), 1, "in-memory state is kept");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            WorkerRegistry::open(&path),
            Err(RegistryError::Serialization(_))
        ));
    }
}
