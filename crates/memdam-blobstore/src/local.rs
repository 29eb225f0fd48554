use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use memdam_types::BlobReference;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::traits::Blobstore;

/// Blob store backed by a local directory.
///
/// A blob named `abcdef....jpg` lives at `<folder>/ab/cd/ef....jpg`. Every
/// write lands in a temporary file in the destination directory and is
/// renamed into place.
#[derive(Debug, Clone)]
pub struct LocalFolderBlobstore {
    folder: PathBuf,
}

impl LocalFolderBlobstore {
    /// Open (creating if needed) a store rooted at `folder`.
    pub fn open(folder: impl AsRef<Path>) -> BlobResult<Self> {
        fs::create_dir_all(folder.as_ref())?;
        let folder = fs::canonicalize(folder.as_ref())?;
        Ok(Self { folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Where `blob` is stored on disk.
    pub fn path_for(&self, blob: &BlobReference) -> PathBuf {
        let hex = blob.id().simple().to_string();
        self.folder
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.{}", &hex[4..], blob.extension()))
    }
}

/// Copy `source` to a temp file beside `target`, then rename it over `target`.
fn copy_atomically(mut source: File, target: &Path) -> io::Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let mut temp = NamedTempFile::new_in(&parent)?;
    io::copy(&mut source, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

impl Blobstore for LocalFolderBlobstore {
    fn set_data_from_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()> {
        let target = self.path_for(blob);
        copy_atomically(File::open(path)?, &target)?;
        debug!(blob = %blob, path = %target.display(), "stored blob");
        Ok(())
    }

    fn get_data_to_file(&self, blob: &BlobReference, path: &Path) -> BlobResult<()> {
        let source = match File::open(self.path_for(blob)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobError::MissingBlob(blob.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        copy_atomically(source, path)?;
        Ok(())
    }

    fn delete(&self, blob: &BlobReference) -> BlobResult<()> {
        match fs::remove_file(self.path_for(blob)) {
            Ok(()) => {
                debug!(blob = %blob, "deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, blob: &BlobReference) -> BlobResult<bool> {
        Ok(self.path_for(blob).is_file())
    }

    fn url_prefix(&self) -> String {
        format!("file://{}/", self.folder.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalFolderBlobstore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFolderBlobstore::open(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn set_and_get_roundtrip() {
        let (_dir, store) = store();
        let blob = BlobReference::generate("bin").unwrap();
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

        store.set_data(&blob, &data).unwrap();
        assert!(store.exists(&blob).unwrap());
        assert_eq!(store.get_data(&blob).unwrap(), data);
    }

    #[test]
    fn layout_is_sharded() {
        let (_dir, store) = store();
        let blob = BlobReference::generate("jpg").unwrap();
        store.set_data(&blob, b"jpeg").unwrap();

        let hex = blob.id().simple().to_string();
        let expected = store
            .folder()
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(format!("{}.jpg", &hex[4..]));
        assert_eq!(fs::read(expected).unwrap(), b"jpeg");
    }

    #[test]
    fn get_to_file_writes_output() {
        let (dir, store) = store();
        let blob = BlobReference::generate("txt").unwrap();
        store.set_data(&blob, b"hello").unwrap();

        let out = dir.path().join("out").join("hello.txt");
        store.get_data_to_file(&blob, &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"hello");
    }

    #[test]
    fn missing_blob_is_reported() {
        let (dir, store) = store();
        let blob = BlobReference::generate("png").unwrap();
        let err = store
            .get_data_to_file(&blob, &dir.path().join("x.png"))
            .unwrap_err();
        assert!(matches!(err, BlobError::MissingBlob(b) if b == blob));
        assert!(!store.exists(&blob).unwrap());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        let blob = BlobReference::generate("wav").unwrap();
        store.set_data(&blob, b"riff").unwrap();

        store.delete(&blob).unwrap();
        assert!(!store.exists(&blob).unwrap());
        store.delete(&blob).unwrap();
    }

    #[test]
    fn overwrite_replaces_contents() {
        let (_dir, store) = store();
        let blob = BlobReference::generate("txt").unwrap();
        store.set_data(&blob, b"first").unwrap();
        store.set_data(&blob, b"second").unwrap();
        assert_eq!(store.get_data(&blob).unwrap(), b"second");
    }

    #[test]
    fn url_prefix_names_folder() {
        let (_dir, store) = store();
        let prefix = store.url_prefix();
        assert!(prefix.starts_with("file://"));
        assert!(prefix.ends_with("blobs/"));
    }
}
