use crate::dataset::{BlobRef, DatasetId, DatasetRecord, HISTORY_LIMIT, Owner, Summary};
use crate::error::{Error, Result};
use crate::saving::{load_snapshot, save_snapshot};
use crate::storage::{BlobStorage, delete_best_effort};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct StoreState {
    next_id: u64,
    records: BTreeMap<DatasetId, DatasetRecord>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    next_id: u64,
    records: Vec<&'a DatasetRecord>,
}

#[derive(Deserialize)]
struct Snapshot {
    next_id: u64,
    records: Vec<DatasetRecord>,
}

/// Metadata store for uploaded datasets
///
/// Every `put` is followed by a retention pass that keeps only the
/// [`HISTORY_LIMIT`] newest records of that owner. The insert and the pass
/// are separate critical sections: concurrent uploads may briefly leave an
/// owner above the limit, and the next pass brings it back down.
///
/// When opened with a snapshot path, the full state is rewritten after every
/// mutation.
pub struct DatasetStore {
    state: RwLock<StoreState>,
    blobs: Arc<dyn BlobStorage>,
    snapshot: Option<PathBuf>,
}

impl DatasetStore {
    /// A store that keeps metadata in memory only.
    pub fn in_memory(blobs: Arc<dyn BlobStorage>) -> Self {
        DatasetStore {
            state: RwLock::new(StoreState::default()),
            blobs,
            snapshot: None,
        }
    }

    /// Open a store persisted at `path`, loading the existing snapshot if any
    ///
    /// # Arguments
    /// * `path` - Snapshot file (gzip-compressed JSON)
    /// * `blobs` - Storage holding the raw files the records refer to
    ///
    /// # Errors
    /// * `StorageIo` if an existing snapshot cannot be read or decoded
    pub fn open(path: impl Into<PathBuf>, blobs: Arc<dyn BlobStorage>) -> Result<Self> {
        let path = path.into();
        let snapshot: Option<Snapshot> = load_snapshot(&path)
            .map_err(|e| Error::storage(format!("load {}", path.display()), e))?;

        let state = match snapshot {
            Some(snapshot) => {
                let records: BTreeMap<_, _> = snapshot
                    .records
                    .into_iter()
                    .map(|record| (record.id, record))
                    .collect();
                let max_id = records.keys().next_back().map(|id| id.0).unwrap_or(0);
                StoreState {
                    next_id: snapshot.next_id.max(max_id),
                    records,
                }
            }
            None => StoreState::default(),
        };
        log::info!(
            "opened dataset store at {} with {} records",
            path.display(),
            state.records.len()
        );

        Ok(DatasetStore {
            state: RwLock::new(state),
            blobs,
            snapshot: Some(path),
        })
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStorage> {
        &self.blobs
    }

    /// Create a record, then reconcile the owner's history
    ///
    /// # Returns
    /// * `Result<DatasetRecord>` - The stored record
    ///
    /// # Errors
    /// * `StorageIo` if the record cannot be written; nothing is stored then
    ///
    /// # Notes
    /// * A failing retention pass is logged, not returned: the record is
    ///   already durable and the next pass will reconcile
    pub fn put(
        &self,
        owner: &Owner,
        name: &str,
        summary: Summary,
        storage_reference: BlobRef,
    ) -> Result<DatasetRecord> {
        let record = {
            let mut state = self.write_state();
            state.next_id += 1;
            let record = DatasetRecord {
                id: DatasetId(state.next_id),
                owner: owner.clone(),
                name: name.to_string(),
                created_at: Utc::now(),
                summary,
                storage_reference,
            };
            state.records.insert(record.id, record.clone());

            if let Err(e) = self.persist(&state) {
                state.records.remove(&record.id);
                return Err(e);
            }
            record
        };
        log::info!("stored dataset {} ({}) for {}", record.id, record.name, owner);

        if let Err(e) = self.enforce_retention(owner) {
            log::warn!("retention pass for {} failed: {}", owner, e);
        }

        Ok(record)
    }

    /// The owner's records, newest first, at most [`HISTORY_LIMIT`].
    pub fn list(&self, owner: &Owner) -> Vec<DatasetRecord> {
        let state = self.read_state();
        let mut records = owned_by(&state, owner);
        records.truncate(HISTORY_LIMIT);
        records.into_iter().cloned().collect()
    }

    /// Look up a record; records of other owners are reported as `NotFound`.
    pub fn get(&self, owner: &Owner, id: DatasetId) -> Result<DatasetRecord> {
        self.read_state()
            .records
            .get(&id)
            .filter(|record| &record.owner == owner)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Delete a record and, best-effort, its raw file.
    pub fn delete(&self, owner: &Owner, id: DatasetId) -> Result<()> {
        let removed = {
            let mut state = self.write_state();
            match state.records.get(&id) {
                Some(record) if &record.owner == owner => {}
                _ => return Err(Error::NotFound),
            }
            let removed = state.records.remove(&id).ok_or(Error::NotFound)?;
            if let Err(e) = self.persist(&state) {
                state.records.insert(id, removed);
                return Err(e);
            }
            removed
        };

        delete_best_effort(self.blobs.as_ref(), &removed.storage_reference);
        log::info!("deleted dataset {} for {}", id, owner);
        Ok(())
    }

    /// Keep only the [`HISTORY_LIMIT`] newest records of `owner`
    ///
    /// Idempotent; safe to run at any time, also to repair histories that
    /// exceed the limit for other reasons (imports, races).
    ///
    /// # Returns
    /// * `Result<Vec<DatasetId>>` - Ids of the evicted records, oldest last
    pub fn enforce_retention(&self, owner: &Owner) -> Result<Vec<DatasetId>> {
        let evicted = {
            let mut state = self.write_state();
            let stale: Vec<DatasetId> = owned_by(&state, owner)
                .into_iter()
                .skip(HISTORY_LIMIT)
                .map(|record| record.id)
                .collect();
            if stale.is_empty() {
                return Ok(Vec::new());
            }

            let removed: Vec<DatasetRecord> = stale
                .iter()
                .filter_map(|id| state.records.remove(id))
                .collect();
            if let Err(e) = self.persist(&state) {
                for record in removed {
                    state.records.insert(record.id, record);
                }
                return Err(e);
            }
            removed
        };

        for record in &evicted {
            delete_best_effort(self.blobs.as_ref(), &record.storage_reference);
            log::info!("evicted dataset {} ({}) for {}", record.id, record.name, owner);
        }
        Ok(evicted.into_iter().map(|record| record.id).collect())
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = SnapshotRef {
            next_id: state.next_id,
            records: state.records.values().collect(),
        };
        save_snapshot(&snapshot, path)
            .map_err(|e| Error::storage(format!("save {}", path.display()), e))
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// Owner's records, newest first (creation time, then id)
fn owned_by<'a>(state: &'a StoreState, owner: &Owner) -> Vec<&'a DatasetRecord> {
    let mut records: Vec<&DatasetRecord> = state
        .records
        .values()
        .filter(|record| &record.owner == owner)
        .collect();
    records.sort_by(|a, b| b.recency().cmp(&a.recency()));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Averages;
    use crate::storage::MemoryBlobStorage;
    use indexmap::IndexMap;

    fn summary() -> Summary {
        Summary {
            total_records: 1,
            averages: Averages::default(),
            type_distribution: IndexMap::new(),
            data_preview: Vec::new(),
        }
    }

    fn store() -> (Arc<MemoryBlobStorage>, DatasetStore) {
        let blobs = Arc::new(MemoryBlobStorage::new());
        let store = DatasetStore::in_memory(blobs.clone());
        (blobs, store)
    }

    fn upload(
        blobs: &MemoryBlobStorage,
        store: &DatasetStore,
        owner: &Owner,
        name: &str,
    ) -> DatasetRecord {
        let reference = blobs.write(name, b"raw").unwrap();
        store.put(owner, name, summary(), reference).unwrap()
    }

    #[test]
    fn history_keeps_five_newest() {
        let (blobs, store) = store();
        let owner = Owner::new("alice");

        let ids: Vec<DatasetId> = (0..12)
            .map(|i| upload(&blobs, &store, &owner, &format!("run{}.csv", i)).id)
            .collect();

        let listed: Vec<DatasetId> = store.list(&owner).iter().map(|r| r.id).collect();
        let expected: Vec<DatasetId> = ids.iter().rev().take(5).copied().collect();
        assert_eq!(listed, expected);
        assert_eq!(blobs.len(), 5);
    }

    #[test]
    fn sixth_upload_evicts_oldest() {
        let (blobs, store) = store();
        let owner = Owner::new("alice");
        let first = upload(&blobs, &store, &owner, "first.csv");
        for i in 0..4 {
            upload(&blobs, &store, &owner, &format!("{}.csv", i));
        }
        assert_eq!(store.list(&owner).len(), 5);

        upload(&blobs, &store, &owner, "sixth.csv");

        let listed = store.list(&owner);
        assert_eq!(listed.len(), 5);
        assert!(listed.iter().all(|r| r.id != first.id));
        assert!(!blobs.contains(&first.storage_reference));
        assert!(matches!(store.get(&owner, first.id), Err(Error::NotFound)));
    }

    #[test]
    fn owners_are_isolated() {
        let (blobs, store) = store();
        let alice = Owner::new("alice");
        let bob = Owner::new("bob");
        let record = upload(&blobs, &store, &alice, "a.csv");
        for i in 0..6 {
            upload(&blobs, &store, &bob, &format!("b{}.csv", i));
        }

        assert_eq!(store.list(&alice).len(), 1);
        assert!(matches!(store.get(&bob, record.id), Err(Error::NotFound)));
        assert!(matches!(store.delete(&bob, record.id), Err(Error::NotFound)));
        assert_eq!(store.get(&alice, record.id).unwrap(), record);
    }

    #[test]
    fn delete_removes_record_and_blob() {
        let (blobs, store) = store();
        let owner = Owner::new("alice");
        let record = upload(&blobs, &store, &owner, "a.csv");

        store.delete(&owner, record.id).unwrap();
        assert!(store.list(&owner).is_empty());
        assert!(blobs.is_empty());
        assert!(matches!(store.delete(&owner, record.id), Err(Error::NotFound)));
    }

    #[test]
    fn retention_repairs_existing_overshoot() {
        let (blobs, store) = store();
        let owner = Owner::new("alice");
        {
            let mut state = store.write_state();
            for i in 1..=7u64 {
                let reference = blobs.write("legacy.csv", b"raw").unwrap();
                state.next_id = i;
                state.records.insert(
                    DatasetId(i),
                    DatasetRecord {
                        id: DatasetId(i),
                        owner: owner.clone(),
                        name: format!("legacy{}.csv", i),
                        created_at: Utc::now(),
                        summary: summary(),
                        storage_reference: reference,
                    },
                );
            }
        }

        let evicted = store.enforce_retention(&owner).unwrap();
        assert_eq!(evicted, vec![DatasetId(2), DatasetId(1)]);
        assert_eq!(blobs.len(), 5);
        assert!(store.enforce_retention(&owner).unwrap().is_empty());
    }

    #[test]
    fn concurrent_puts_converge() {
        let (blobs, store) = store();
        let owner = Owner::new("alice");

        std::thread::scope(|scope| {
            for t in 0..8 {
                let (blobs, store, owner) = (&blobs, &store, &owner);
                scope.spawn(move || {
                    for i in 0..4 {
                        upload(blobs, store, owner, &format!("t{}-{}.csv", t, i));
                    }
                });
            }
        });

        assert_eq!(store.list(&owner).len(), 5);
        assert_eq!(store.read_state().records.len(), 5);
        assert_eq!(blobs.len(), 5);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datasets.json.gz");
        let blobs = Arc::new(MemoryBlobStorage::new());
        let owner = Owner::new("alice");

        let record = {
            let store = DatasetStore::open(&path, blobs.clone()).unwrap();
            upload(&blobs, &store, &owner, "a.csv")
        };

        let reopened = DatasetStore::open(&path, blobs.clone()).unwrap();
        assert_eq!(reopened.get(&owner, record.id).unwrap(), record);

        let next = upload(&blobs, &reopened, &owner, "b.csv");
        assert!(next.id > record.id);
    }

    #[test]
    fn failed_snapshot_write_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory at the snapshot path makes the final rename fail
        let path = dir.path().join("datasets.json.gz");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let blobs = Arc::new(MemoryBlobStorage::new());
        let store = DatasetStore {
            state: RwLock::new(StoreState::default()),
            blobs: blobs.clone(),
            snapshot: Some(path),
        };
        let owner = Owner::new("alice");
        let reference = blobs.write("a.csv", b"raw").unwrap();

        let result = store.put(&owner, "a.csv", summary(), reference);
        assert!(matches!(result, Err(Error::StorageIo { .. })));
        assert!(store.list(&owner).is_empty());
    }
}
