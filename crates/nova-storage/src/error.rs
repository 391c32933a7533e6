use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("unexpected file magic: expected {expected:?}, found {found:?}")]
    WrongMagic { expected: [u8; 8], found: [u8; 8] },
    #[error("incompatible log format version: expected {expected}, found {found}")]
    WrongFormat { expected: u32, found: u32 },
    #[error("incompatible schema version: expected {expected}, found {found}")]
    WrongSchema { expected: u32, found: u32 },
    #[error("truncated file: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("record checksum mismatch at offset {offset}: expected {expected}, found {found}")]
    HashMismatch { offset: u64, expected: u64, found: u64 },
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: &'static str },
    #[error("record payload of {len} bytes exceeds the supported maximum")]
    OversizedRecord { len: usize },
    #[error("invalid varint: {0}")]
    InvalidVarint(&'static str),
    #[error("value decoding failed: {0}")]
    Decode(String),
    #[error("store was opened read-only")]
    ReadOnly,
    #[error("identifier space exhausted")]
    IdSpaceExhausted,
    #[error("storage directory {path} is locked by another writer")]
    Locked { path: PathBuf },
}

impl StorageError {
    /// Returns `true` for errors caused by unreadable or foreign on-disk bytes.
    ///
    /// Callers use this to decide whether wiping and rebuilding the storage is a
    /// meaningful recovery, as opposed to environmental failures (permissions, a
    /// held lock) that a rebuild would not fix.
    pub fn is_corruption(&self) -> bool {
        match self {
            StorageError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData
            ),
            StorageError::InvalidHeader(_)
            | StorageError::WrongMagic { .. }
            | StorageError::WrongFormat { .. }
            | StorageError::WrongSchema { .. }
            | StorageError::Truncated { .. }
            | StorageError::HashMismatch { .. }
            | StorageError::CorruptRecord { .. }
            | StorageError::OversizedRecord { .. }
            | StorageError::InvalidVarint(_)
            | StorageError::Decode(_) => true,
            StorageError::ReadOnly
            | StorageError::IdSpaceExhausted
            | StorageError::Locked { .. } => false,
        }
    }
}
