use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use nova_storage::{
    decode_varint, encode_varint, KeyCodec, OpenMode, PersistentMap, StorageError, ValueCodec,
    LOG_HEADER_LEN,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Name(String);

impl KeyCodec for Name {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self, StorageError> {
        String::from_utf8(bytes.to_vec())
            .map(Name)
            .map_err(|err| StorageError::Decode(err.to_string()))
    }
}

/// Counters appended as varints; decoding sums them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Total(u64);

impl ValueCodec for Total {
    fn encode_value(&self, out: &mut Vec<u8>) {
        encode_varint(self.0, out);
    }

    fn decode_value(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut pos = 0;
        let mut total = 0u64;
        while pos < bytes.len() {
            total += decode_varint(bytes, &mut pos)?;
        }
        Ok(Total(total))
    }
}

type Map = PersistentMap<Name, Total>;

fn open(path: &Path, mode: OpenMode) -> Result<Map, StorageError> {
    PersistentMap::open(path, 3, mode)
}

fn key(name: &str) -> Name {
    Name(name.to_string())
}

#[test]
fn appended_chunks_are_decoded_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");

    let mut map = open(&path, OpenMode::ReadWrite).unwrap();
    for amount in [1, 2, 3] {
        map.append_with(key("a"), |out| encode_varint(amount, out))
            .unwrap();
    }
    assert_eq!(map.get(&key("a")).unwrap(), Some(Total(6)));
    map.close().unwrap();

    let map = open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(map.get(&key("a")).unwrap(), Some(Total(6)));
    assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec![key("a")]);
}

#[test]
fn torn_trailing_record_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");

    let mut map = open(&path, OpenMode::ReadWrite).unwrap();
    map.put(key("a"), &Total(7)).unwrap();
    map.close().unwrap();
    let clean_len = std::fs::metadata(&path).unwrap().len();

    // A record cut off after its tag and half of its length prefix.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 9, 0]).unwrap();
    drop(file);

    let map = open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(map.get(&key("a")).unwrap(), Some(Total(7)));
    drop(map);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len + 3);

    let mut map = open(&path, OpenMode::ReadWrite).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
    map.put(key("b"), &Total(1)).unwrap();
    map.close().unwrap();

    let map = open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(map.len(), 2);
}

#[test]
fn flipped_payload_byte_is_reported_as_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");

    let mut map = open(&path, OpenMode::ReadWrite).unwrap();
    map.put(key("abc"), &Total(5)).unwrap();
    map.close().unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    // Header, then tag (1 byte) and length (4 bytes); flip a key byte.
    bytes[LOG_HEADER_LEN + 5 + 1] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = open(&path, OpenMode::ReadWrite).unwrap_err();
    assert!(matches!(err, StorageError::HashMismatch { .. }), "{err:?}");
    assert!(err.is_corruption());
}

#[test]
fn foreign_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");
    std::fs::write(&path, b"definitely not a record log").unwrap();

    let err = open(&path, OpenMode::ReadWrite).unwrap_err();
    assert!(matches!(err, StorageError::WrongMagic { .. }), "{err:?}");
    assert!(err.is_corruption());
}

#[test]
fn read_only_map_rejects_writes_and_never_compacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");
    open(&path, OpenMode::ReadWrite).unwrap().close().unwrap();

    let mut map = open(&path, OpenMode::ReadOnly).unwrap();
    let err = map.put(key("a"), &Total(1)).unwrap_err();
    assert!(matches!(err, StorageError::ReadOnly));
    assert!(!map.needs_compaction(&nova_storage::CompactionPolicy {
        min_bytes: 0,
        min_live_ratio: 1.0,
    }));
}

#[test]
fn read_only_open_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = open(&dir.path().join("missing.log"), OpenMode::ReadOnly).unwrap_err();
    assert!(matches!(err, StorageError::Io(_)), "{err:?}");
}

#[test]
fn compaction_sums_appended_chunks_into_one_put() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("totals.log");

    let mut map = open(&path, OpenMode::ReadWrite).unwrap();
    for _ in 0..100 {
        map.append_with(key("hits"), |out| encode_varint(1, out))
            .unwrap();
    }
    let report = map.compact().unwrap();
    assert_eq!(report.keys, 1);
    assert!(report.after_bytes < report.before_bytes);
    assert_eq!(map.stats().log_bytes, report.after_bytes);
    map.close().unwrap();

    let map = open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(map.get(&key("hits")).unwrap(), Some(Total(100)));
}
