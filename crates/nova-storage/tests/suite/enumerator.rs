use nova_storage::{OpenMode, StorageError, StringEnumerator};

#[test]
fn names_survive_reopen_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class.names");

    let mut names = StringEnumerator::open(&path, 1, OpenMode::ReadWrite).unwrap();
    let ids: Vec<u32> = ["com.a.Foo", "com.a.Bar", "com.a.Foo", "com.b.Baz"]
        .into_iter()
        .map(|name| names.enumerate(name).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 1, 3]);
    names.close().unwrap();

    let mut names = StringEnumerator::open(&path, 1, OpenMode::ReadOnly).unwrap();
    assert_eq!(names.len(), 3);
    assert_eq!(names.try_enumerate("com.b.Baz").unwrap(), Some(3));
    assert_eq!(names.value_of(2).unwrap().as_deref(), Some("com.a.Bar"));
    let err = names.enumerate("com.c.New").unwrap_err();
    assert!(matches!(err, StorageError::ReadOnly));
}

#[test]
fn unflushed_names_are_lost_without_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("method.names");

    let mut names = StringEnumerator::open(&path, 1, OpenMode::ReadWrite).unwrap();
    names.enumerate("kept").unwrap();
    names.force_flush().unwrap();
    names.enumerate("lost").unwrap();
    drop(names);

    let mut names = StringEnumerator::open(&path, 1, OpenMode::ReadWrite).unwrap();
    assert_eq!(names.try_enumerate("lost").unwrap(), None);
    assert_eq!(names.enumerate("next").unwrap(), 2);
}

#[test]
fn enumerator_rejects_map_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("names");
    let map: nova_storage::PersistentMap<Key, Key> =
        nova_storage::PersistentMap::open(&path, 1, OpenMode::ReadWrite).unwrap();
    map.close().unwrap();

    let err = StringEnumerator::open(&path, 1, OpenMode::ReadWrite).unwrap_err();
    assert!(matches!(err, StorageError::WrongMagic { .. }), "{err:?}");
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key;

impl nova_storage::KeyCodec for Key {
    fn encode_key(&self, _out: &mut Vec<u8>) {}

    fn decode_key(_bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(Key)
    }
}

impl nova_storage::ValueCodec for Key {
    fn encode_value(&self, _out: &mut Vec<u8>) {}

    fn decode_value(_bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(Key)
    }
}
