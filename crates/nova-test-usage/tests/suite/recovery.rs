use std::io;
use std::sync::{Arc, Mutex};

use nova_storage::{read_version_stamp, write_version_stamp, StorageError, LOG_HEADER_LEN};
use nova_test_usage::{
    TestTrace, TestUsageError, TestUsageIndex, INDEX_VERSION, METHOD_TESTS_FILE, VERSION_FILE,
};

use tracing_subscriber::fmt::MakeWriter;

use super::{open, quiet_config};

#[derive(Clone, Default)]
struct SharedLogBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedLogBuffer {
    fn as_string(&self) -> String {
        let bytes = self.0.lock().expect("log buffer mutex poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedLogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self.0.lock().expect("log buffer mutex poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(self.0.clone())
    }
}

fn populate(dir: &std::path::Path) {
    let index = open(dir);
    index
        .update_from_trace(&TestTrace::new("T").with_methods("A", ["m"]))
        .unwrap();
    index.dispose().unwrap();
}

#[test]
fn fresh_directory_is_stamped() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("index");

    let index = open(&root);
    assert_eq!(
        read_version_stamp(&root.join(VERSION_FILE)).unwrap(),
        Some(INDEX_VERSION)
    );
    index.dispose().unwrap();
}

#[test]
fn stale_version_wipes_the_index() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    std::fs::write(dir.path().join("leftover.tmp"), b"stale").unwrap();
    write_version_stamp(&dir.path().join(VERSION_FILE), 0).unwrap();

    let index = open(dir.path());
    assert!(!index.has_test_trace("T").unwrap());
    assert!(index.tests_for_method("A", "m").unwrap().is_empty());
    assert!(!dir.path().join("leftover.tmp").exists());
    assert_eq!(
        read_version_stamp(&dir.path().join(VERSION_FILE)).unwrap(),
        Some(INDEX_VERSION)
    );
    index.dispose().unwrap();
}

#[test]
fn rebuild_cause_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    write_version_stamp(&dir.path().join(VERSION_FILE), INDEX_VERSION + 1).unwrap();

    let logs = SharedLogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::WARN)
        .with_writer(logs.clone())
        .finish();
    let index = tracing::subscriber::with_default(subscriber, || open(dir.path()));
    index.dispose().unwrap();

    let text = logs.as_string();
    assert!(
        text.contains("test usage index version changed; rebuilding"),
        "expected rebuild warning, got:\n{text}"
    );
}

#[test]
fn corrupt_store_is_rebuilt_empty() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let path = dir.path().join(METHOD_TESTS_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    // Header, then tag (1 byte) and length (4 bytes); flip a key byte.
    bytes[LOG_HEADER_LEN + 5 + 1] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    // Read-only inspection never repairs.
    let err = TestUsageIndex::open_read_only(dir.path()).unwrap_err();
    assert!(
        matches!(err, TestUsageError::Storage(StorageError::HashMismatch { .. })),
        "{err:?}"
    );

    let index = open(dir.path());
    assert!(!index.has_test_trace("T").unwrap());
    assert!(index.stats().unwrap().stores.iter().all(|s| s.entries == 0));

    // The rebuilt index is fully usable.
    index
        .update_from_trace(&TestTrace::new("U").with_methods("A", ["m"]))
        .unwrap();
    assert_eq!(index.tests_for_method("A", "m").unwrap(), ["U"]);
    index.dispose().unwrap();
}

#[test]
fn torn_tail_is_dropped_without_rebuilding() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let path = dir.path().join(METHOD_TESTS_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    let valid_len = bytes.len();
    // A record prefix cut short by a crash.
    bytes.extend_from_slice(&[2, 9, 0]);
    std::fs::write(&path, &bytes).unwrap();

    let index = open(dir.path());
    assert_eq!(index.tests_for_method("A", "m").unwrap(), ["T"]);
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        valid_len as u64
    );
    index.dispose().unwrap();
}

#[test]
fn second_writer_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let first = open(dir.path());

    let err = TestUsageIndex::open_with_config(dir.path(), quiet_config()).unwrap_err();
    assert!(
        matches!(err, TestUsageError::Storage(StorageError::Locked { .. })),
        "{err:?}"
    );

    first.dispose().unwrap();
    let second = open(dir.path());
    second.dispose().unwrap();
}
