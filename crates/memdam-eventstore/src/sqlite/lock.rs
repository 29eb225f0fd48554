//! Cross-process lock guarding first-time table creation.
//!
//! Path: `<folder>/<table>.lock`. The file carries no content; the advisory
//! OS lock on it is what matters.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

/// A held exclusive lock on a table's lock file.
///
/// The lock is released when this struct is dropped.
pub(crate) struct TableLock {
    file: File,
    path: PathBuf,
}

impl TableLock {
    /// Block until the lock at `path` is ours.
    pub(crate) fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release table lock");
        }
    }
}
