use crate::dataset::BlobRef;
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

/// Storage for the raw bytes of uploaded files
///
/// `delete` is idempotent: removing a reference that no longer exists succeeds.
pub trait BlobStorage: Send + Sync {
    fn write(&self, name_hint: &str, bytes: &[u8]) -> Result<BlobRef>;
    fn read(&self, reference: &BlobRef) -> Result<Vec<u8>>;
    fn delete(&self, reference: &BlobRef) -> Result<()>;
}

/// Remove a blob, logging instead of failing
///
/// Used wherever raw file removal must not block a metadata operation.
pub fn delete_best_effort(storage: &dyn BlobStorage, reference: &BlobRef) {
    if let Err(e) = storage.delete(reference) {
        log::warn!("failed to delete raw file {}: {}", reference, e);
    }
}

/// Blob storage in a directory on the local filesystem
///
/// Files are named `<uuid>_<sanitized original name>` and referenced by that
/// file name.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    /// Open (and create if needed) a storage directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::storage(format!("create {}", root.display()), e))?;
        Ok(FsBlobStorage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, reference: &BlobRef) -> Result<PathBuf> {
        let name = reference.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::storage(
                format!("resolve {}", name),
                io::Error::new(io::ErrorKind::InvalidInput, "invalid blob reference"),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl BlobStorage for FsBlobStorage {
    fn write(&self, name_hint: &str, bytes: &[u8]) -> Result<BlobRef> {
        let reference = BlobRef::new(format!("{}_{}", Uuid::new_v4(), sanitize_name(name_hint)));
        let path = self.path_of(&reference)?;
        fs::write(&path, bytes)
            .map_err(|e| Error::storage(format!("write {}", path.display()), e))?;
        Ok(reference)
    }

    fn read(&self, reference: &BlobRef) -> Result<Vec<u8>> {
        let path = self.path_of(reference)?;
        fs::read(&path).map_err(|e| Error::storage(format!("read {}", path.display()), e))
    }

    fn delete(&self, reference: &BlobRef) -> Result<()> {
        let path = self.path_of(reference)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("delete {}", path.display()), e)),
        }
    }
}

/// Blob storage held in memory
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: RwLock<HashMap<BlobRef, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, reference: &BlobRef) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(reference))
            .unwrap_or_default()
    }
}

fn poisoned() -> Error {
    Error::storage("memory storage", io::Error::other("lock poisoned"))
}

impl BlobStorage for MemoryBlobStorage {
    fn write(&self, name_hint: &str, bytes: &[u8]) -> Result<BlobRef> {
        let reference = BlobRef::new(format!("{}_{}", Uuid::new_v4(), sanitize_name(name_hint)));
        self.blobs
            .write()
            .map_err(|_| poisoned())?
            .insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    fn read(&self, reference: &BlobRef) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| poisoned())?
            .get(reference)
            .cloned()
            .ok_or_else(|| {
                Error::storage(
                    format!("read {}", reference),
                    io::Error::new(io::ErrorKind::NotFound, "no such blob"),
                )
            })
    }

    fn delete(&self, reference: &BlobRef) -> Result<()> {
        self.blobs.write().map_err(|_| poisoned())?.remove(reference);
        Ok(())
    }
}

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]+").expect("valid pattern");
}

// Keep only characters safe in a file name; never empty
fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = UNSAFE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_storage_round_trip_and_idempotent_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBlobStorage::new(dir.path().join("media")).unwrap();

        let reference = storage.write("plant data.csv", b"a,b\n1,2\n").unwrap();
        assert!(reference.as_str().ends_with("_plant_data.csv"));
        assert_eq!(storage.read(&reference).unwrap(), b"a,b\n1,2\n");

        storage.delete(&reference).unwrap();
        storage.delete(&reference).unwrap();
        assert!(matches!(storage.read(&reference), Err(Error::StorageIo { .. })));
    }

    #[test]
    fn fs_storage_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBlobStorage::new(dir.path()).unwrap();
        assert!(storage.read(&BlobRef::new("../secret")).is_err());
        assert!(storage.delete(&BlobRef::new("..")).is_err());
    }

    #[test]
    fn memory_storage_tracks_blobs() {
        let storage = MemoryBlobStorage::new();
        let reference = storage.write("x.csv", b"1").unwrap();
        assert!(storage.contains(&reference));
        storage.delete(&reference).unwrap();
        storage.delete(&reference).unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("ränge data.xlsx"), "r_nge_data.xlsx");
        assert_eq!(sanitize_name(".."), "upload");
    }
}
