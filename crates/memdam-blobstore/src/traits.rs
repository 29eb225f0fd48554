use std::fs;
use std::io::Write;
use std::path::Path;

use memdam_types::BlobReference;

use crate::error::BlobResult;

/// Reference-keyed binary storage.
///
/// Implementations must make each call atomic per reference: a concurrent
/// reader sees either the whole blob or no blob.
pub trait Blobstore: Send + Sync {
    /// Store the contents of the file at `path` under `blob`, replacing any
    /// previous contents.
    fn set_data_from_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()>;

    /// Write the contents of `blob` to `path`.
    ///
    /// Returns [`BlobError::MissingBlob`](crate::BlobError::MissingBlob) if
    /// the blob is absent.
    fn get_data_to_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()>;

    /// Remove `blob`. Removing an absent blob is not an error.
    fn delete(&self, blob: &BlobReference) -> BlobResult<()>;

    fn exists(&self, blob: &BlobReference) -> BlobResult<bool>;

    /// Prefix under which this store's blobs are addressable.
    fn url_prefix(&self) -> String;

    /// Store `data` under `blob`.
    fn set_data(&self, blob: &BlobReference, data: &[u8]) -> BlobResult<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(data)?;
        file.flush()?;
        self.set_data_from_file(blob, file.path())
    }

    /// Read the whole of `blob` into memory.
    fn get_data(&self, blob: &BlobReference) -> BlobResult<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(blob.name());
        self.get_data_to_file(blob, &path)?;
        Ok(fs::read(&path)?)
    }
}
