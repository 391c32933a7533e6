use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::StorageError;

/// An exclusive, process-wide claim on a storage directory.
///
/// Backed by an OS advisory lock on a file inside the directory; the lock is
/// released when this value is dropped (or the process exits).
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    /// Takes the lock without blocking; fails with [`StorageError::Locked`] if
    /// another handle holds it.
    pub fn try_acquire(dir: &Path, file_name: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, file }),
            Err(err) if is_contended(&err) => Err(StorageError::Locked {
                path: dir.to_path_buf(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::debug!(
                target = "nova.storage",
                path = %self.path.display(),
                error = %err,
                "failed to release directory lock"
            );
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
