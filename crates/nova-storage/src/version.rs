use std::io;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::write::atomic_write;
use crate::StorageError;

const STAMP_LEN: usize = 4;

/// Reads a `u32` version stamp written by [`write_version_stamp`].
///
/// Returns `Ok(None)` when the stamp file does not exist.
pub fn read_version_stamp(path: &Path) -> Result<Option<u32>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() != STAMP_LEN {
        return Err(StorageError::Truncated {
            expected: STAMP_LEN,
            found: bytes.len(),
        });
    }
    Ok(Some(LittleEndian::read_u32(&bytes)))
}

/// Atomically replaces the version stamp at `path`.
pub fn write_version_stamp(path: &Path, version: u32) -> Result<(), StorageError> {
    let mut bytes = [0u8; STAMP_LEN];
    LittleEndian::write_u32(&mut bytes, version);
    atomic_write(path, &bytes)
}
