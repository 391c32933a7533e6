//! Append-only, crash-tolerant storage primitives for Nova's persistent indexes.
//!
//! ## Format
//! Every store is a single record log:
//! - a fixed-size header (16 bytes): magic (8 bytes), log framing version
//!   (`u32` LE), caller schema version (`u32` LE)
//! - a sequence of records, each `tag: u8`, `len: u32 LE`, payload,
//!   `checksum: u64 LE` (first 8 bytes of `blake3(tag || payload)`)
//!
//! A torn trailing record is the normal result of a crash mid-write and is
//! dropped on open. Anything else that fails validation is reported as an error
//! for which [`StorageError::is_corruption`] returns `true`; owners of a store
//! are expected to discard and rebuild it.
//!
//! Writes are buffered in memory and only reach the disk on `force_flush` or
//! `close`. Dropping a store without closing it loses the buffered records,
//! which is indistinguishable from a crash.

mod enumerator;
mod error;
mod lock;
mod map;
mod record_log;
mod varint;
mod version;
mod write;

pub use enumerator::{StringEnumerator, ENUMERATOR_MAGIC};
pub use error::StorageError;
pub use lock::DirLock;
pub use map::{
    CompactionPolicy, CompactionReport, KeyCodec, MapStats, PersistentMap, ValueCodec, MAP_MAGIC,
};
pub use record_log::{
    record_len, LogFormat, LogRewrite, OpenMode, RecordLog, RecordTag, RecordView,
    LOG_FORMAT_VERSION, LOG_HEADER_LEN, MAX_RECORD_PAYLOAD,
};
pub use varint::{
    decode_signed_varint, decode_varint, decode_varint_u32, encode_signed_varint, encode_varint,
    zigzag_decode, zigzag_encode,
};
pub use version::{read_version_stamp, write_version_stamp};
pub use write::{atomic_write, remove_dir_contents};
