//! ==============================================================================
//! storage/fallback.rs - bounded in-process store with disk snapshot
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     holds the most recent records while the primary store is unreachable.
//!     capacity is fixed; the oldest *inserted* record is evicted first
//!     (strict fifo, timestamps are not consulted).
//!
//!     after every mutation the whole collection is rewritten as one json
//!     array (tmp file + rename), so a restart picks up where we left off.
//!
//! relationships:
//!     - used by: storage/router.rs
//! ```
//!
//! ==============================================================================

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const DEFAULT_CAPACITY: usize = 100;

/// snapshot document for sensor readings
pub const SENSOR_SNAPSHOT_FILE: &str = "sensor_records.json";

#[derive(Debug)]
pub struct FallbackStore<T> {
    records: VecDeque<T>,
    capacity: usize,
    snapshot_path: Option<PathBuf>,
}

impl<T> FallbackStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// in-memory only, no snapshot file
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            snapshot_path: None,
        }
    }

    /// open a snapshot-backed store, restoring whatever the file holds
    pub fn open(capacity: usize, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let mut store = Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            snapshot_path: Some(snapshot_path.clone()),
        };

        if snapshot_path.exists() {
            let content = std::fs::read(&snapshot_path)?;
            let restored: Vec<T> = serde_json::from_slice(&content)?;
            let skip = restored.len().saturating_sub(store.capacity);
            store.records.extend(restored.into_iter().skip(skip));
            tracing::info!(
                "[FALLBACK] restored {} records from {}",
                store.records.len(),
                snapshot_path.display()
            );
        } else if let Some(parent) = snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(store)
    }

    /// like `open`, but a snapshot that cannot be restored is moved aside to
    /// `<name>.corrupt` and the store starts empty on the original path
    pub fn open_or_quarantine(capacity: usize, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        match Self::open(capacity, snapshot_path.clone()) {
            Ok(store) => Ok(store),
            Err(e) if snapshot_path.is_file() => {
                let quarantine = quarantine_path(&snapshot_path);
                tracing::warn!(
                    "[FALLBACK] unreadable snapshot {} ({}), moved to {}",
                    snapshot_path.display(),
                    e,
                    quarantine.display()
                );
                std::fs::rename(&snapshot_path, &quarantine)?;
                let store = Self::open(capacity, snapshot_path)?;
                store.write_snapshot()?;
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    /// append a record, evicting the oldest inserted one when full
    pub fn push(&mut self, record: T) -> Option<T> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        self.persist();
        evicted
    }

    /// newest first
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    /// insertion order, oldest first
    pub fn records(&self) -> Vec<T> {
        self.records.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn persist(&self) {
        if let Err(e) = self.write_snapshot() {
            tracing::warn!("[FALLBACK] snapshot write failed: {}", e);
        }
    }

    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let records: Vec<&T> = self.records.iter().collect();
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        seq: u32,
        timestamp_ms: u64,
    }

    #[test]
    fn evicts_oldest_inserted_not_oldest_timestamp() {
        let mut store = FallbackStore::in_memory(100);
        // the first insert carries the *newest* timestamp
        store.push(Rec { seq: 0, timestamp_ms: 9_999_999 });
        for seq in 1..100 {
            store.push(Rec { seq, timestamp_ms: seq as u64 });
        }
        assert_eq!(store.len(), 100);

        let evicted = store.push(Rec { seq: 100, timestamp_ms: 100 });
        assert_eq!(evicted.map(|r| r.seq), Some(0));
        assert_eq!(store.len(), 100);
        assert_eq!(store.records().first().map(|r| r.seq), Some(1));
        assert_eq!(store.recent(1)[0].seq, 100);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SENSOR_SNAPSHOT_FILE);

        {
            let mut store = FallbackStore::open(3, &path).unwrap();
            for seq in 0..5 {
                store.push(Rec { seq, timestamp_ms: 0 });
            }
        }

        let on_disk: Vec<Rec> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![2, 3, 4]);

        let reopened: FallbackStore<Rec> = FallbackStore::open(3, &path).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.recent(1)[0].seq, 4);
    }

    #[test]
    fn reopen_with_smaller_capacity_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SENSOR_SNAPSHOT_FILE);
        {
            let mut store = FallbackStore::open(10, &path).unwrap();
            for seq in 0..6 {
                store.push(Rec { seq, timestamp_ms: 0 });
            }
        }
        let reopened: FallbackStore<Rec> = FallbackStore::open(2, &path).unwrap();
        assert_eq!(
            reopened.records().iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn clear_rewrites_snapshot_as_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SENSOR_SNAPSHOT_FILE);
        let mut store = FallbackStore::open(5, &path).unwrap();
        store.push(Rec { seq: 1, timestamp_ms: 0 });
        store.clear();

        let on_disk: Vec<Rec> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_quarantined_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SENSOR_SNAPSHOT_FILE);
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(FallbackStore::<Rec>::open(5, &path).is_err());

        let mut store: FallbackStore<Rec> = FallbackStore::open_or_quarantine(5, &path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.snapshot_path(), Some(path.as_path()));

        let corrupt = dir.path().join("sensor_records.json.corrupt");
        assert_eq!(std::fs::read(&corrupt).unwrap(), b"{ not json");

        store.push(Rec { seq: 7, timestamp_ms: 0 });
        let reopened: FallbackStore<Rec> = FallbackStore::open(5, &path).unwrap();
        assert_eq!(reopened.records(), vec![Rec { seq: 7, timestamp_ms: 0 }]);
    }

    #[test]
    fn quarantine_leaves_a_readable_snapshot_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SENSOR_SNAPSHOT_FILE);
        {
            let mut store = FallbackStore::open(5, &path).unwrap();
            store.push(Rec { seq: 1, timestamp_ms: 0 });
        }
        let store: FallbackStore<Rec> = FallbackStore::open_or_quarantine(5, &path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!dir.path().join("sensor_records.json.corrupt").exists());
    }
}
