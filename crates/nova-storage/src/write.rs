use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::StorageError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomically replaces `path` with `bytes` (temp file, fsync, rename).
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let result = (|| -> Result<(), StorageError> {
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    drop(file);

    let result = result.and_then(|()| rename_overwrite(&tmp_path, path).map_err(Into::into));
    match result {
        Ok(()) => {
            sync_dir_best_effort(parent, "atomic_write.sync_parent_dir");
            Ok(())
        }
        Err(err) => {
            remove_file_best_effort(&tmp_path, "atomic_write.cleanup_tmp");
            Err(err)
        }
    }
}

/// Deletes every entry of `dir` except the names listed in `keep`.
///
/// The directory itself is created if it does not exist.
pub fn remove_dir_contents(dir: &Path, keep: &[&str]) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if keep.iter().any(|keep| name == *keep) {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    sync_dir_best_effort(dir, "remove_dir_contents");
    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> Result<&Path, StorageError> {
    let parent = path
        .parent()
        .ok_or(StorageError::InvalidHeader("missing parent directory"))?;
    Ok(if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    })
}

pub(crate) fn rename_overwrite(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;

    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows) && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
            {
                // On Windows, `rename` doesn't overwrite.
                match fs::remove_file(dest) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }

                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target = "nova.storage",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove file"
            );
        }
    }
}

#[track_caller]
pub(crate) fn sync_dir_best_effort(dir: &Path, reason: &'static str) {
    #[cfg(unix)]
    static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    #[cfg(unix)]
    {
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    let loc = std::panic::Location::caller();
                    tracing::debug!(
                        target = "nova.storage",
                        dir = %dir.display(),
                        reason,
                        file = loc.file(),
                        line = loc.line(),
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (dir, reason);
}
