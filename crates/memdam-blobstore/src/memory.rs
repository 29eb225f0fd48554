use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use memdam_types::BlobReference;

use crate::error::{BlobError, BlobResult};
use crate::traits::Blobstore;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding.
pub struct InMemoryBlobstore {
    blobs: RwLock<HashMap<BlobReference, Vec<u8>>>,
}

impl InMemoryBlobstore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryBlobstore {
    fn default() -> Self {
        Self::new()
    }
}

impl Blobstore for InMemoryBlobstore {
    fn set_data_from_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()> {
        let data = fs::read(path)?;
        self.set_data(blob, &data)
    }

    fn get_data_to_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()> {
        let data = self.get_data(blob)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn delete(&self, blob: &BlobReference) -> BlobResult<()> {
        self.blobs.write().expect("lock poisoned").remove(blob);
        Ok(())
    }

    fn exists(&self, blob: &BlobReference) -> BlobResult<bool> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(blob))
    }

    fn url_prefix(&self) -> String {
        "memory://".to_string()
    }

    fn set_data(&self, blob: &BlobReference, data: &[u8]) -> BlobResult<()> {
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(blob.clone(), data.to_vec());
        Ok(())
    }

    fn get_data(&self, blob: &BlobReference) -> BlobResult<Vec<u8>> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(blob)
            .cloned()
            .ok_or_else(|| BlobError::MissingBlob(blob.clone()))
    }
}

impl std::fmt::Debug for InMemoryBlobstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobstore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let store = InMemoryBlobstore::new();
        let blob = BlobReference::generate("bin").unwrap();
        assert!(store.is_empty());

        store.set_data(&blob, b"abc").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_data(&blob).unwrap(), b"abc");

        store.delete(&blob).unwrap();
        store.delete(&blob).unwrap();
        assert!(matches!(store.get_data(&blob), Err(BlobError::MissingBlob(_))));
    }

    #[test]
    fn file_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryBlobstore::new();
        let blob = BlobReference::generate("txt").unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, b"from disk").unwrap();

        store.set_data_from_file(&blob, &input).unwrap();
        let output = dir.path().join("out.txt");
        store.get_data_to_file(&blob, &output).unwrap();
        assert_eq!(fs::read(output).unwrap(), b"from disk");
    }
}
