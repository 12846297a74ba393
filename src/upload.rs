use crate::dataset::{BlobRef, DatasetId, DatasetRecord, Owner};
use crate::error::Result;
use crate::loader::{TableFormat, load_table};
use crate::storage::{BlobStorage, delete_best_effort};
use crate::store::DatasetStore;
use crate::summarizer::summarize;
use std::sync::Arc;

/// Raw bytes written to storage but not yet owned by a record
///
/// Dropping the guard without [`StagedUpload::commit`] deletes the bytes, so
/// an error or a panic between staging and the store write never leaves an
/// orphaned file behind.
struct StagedUpload<'a> {
    storage: &'a dyn BlobStorage,
    reference: BlobRef,
    committed: bool,
}

impl<'a> StagedUpload<'a> {
    fn stage(storage: &'a dyn BlobStorage, filename: &str, bytes: &[u8]) -> Result<Self> {
        let reference = storage.write(filename, bytes)?;
        Ok(StagedUpload {
            storage,
            reference,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedUpload<'_> {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!("discarding staged upload {}", self.reference);
            delete_best_effort(self.storage, &self.reference);
        }
    }
}

/// Entry point for uploads: stage, summarize, store
pub struct UploadService {
    store: Arc<DatasetStore>,
}

impl UploadService {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        UploadService { store }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Process one uploaded file
    ///
    /// # Arguments
    /// * `owner` - Identity of the uploading user
    /// * `filename` - Original file name; its extension selects the format
    /// * `bytes` - Raw file content
    ///
    /// # Returns
    /// * `Result<DatasetRecord>` - The stored record
    ///
    /// # Errors
    /// * `UnsupportedFormat` before anything is written
    /// * `StorageIo` if the raw bytes cannot be staged
    /// * Any loader or summarizer error, unchanged, after removing the staged bytes
    /// * `StorageIo` from the store, after removing the staged bytes
    pub fn handle_upload(
        &self,
        owner: &Owner,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DatasetRecord> {
        let format = TableFormat::from_filename(filename)?;
        let staged = StagedUpload::stage(self.store.blobs().as_ref(), filename, bytes)?;

        let summary = load_table(format, bytes).and_then(|table| summarize(&table));
        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                log::info!("rejected upload {} from {}: {}", filename, owner, e);
                return Err(e);
            }
        };

        let record = self.store.put(owner, filename, summary, staged.reference.clone())?;
        staged.commit();

        log::info!(
            "processed upload {} from {}: {} records",
            filename,
            owner,
            record.summary.total_records
        );
        Ok(record)
    }

    /// The record and its raw uploaded bytes
    pub fn read_raw(&self, owner: &Owner, id: DatasetId) -> Result<(DatasetRecord, Vec<u8>)> {
        let record = self.store.get(owner, id)?;
        let bytes = self.store.blobs().read(&record.storage_reference)?;
        Ok((record, bytes))
    }
}
