#![no_main]

use std::io::Write;

use libfuzzer_sys::fuzz_target;
use nova_storage::{OpenMode, PersistentMap, LOG_FORMAT_VERSION, MAP_MAGIC};
use nova_test_usage::codec::TombstoneSet;
use nova_test_usage::{MethodKey, TestId};

mod utils;

const SCHEMA_VERSION: u32 = 1;

type Map = PersistentMap<MethodKey, TombstoneSet<TestId>>;

fuzz_target!(|data: &[u8]| {
    let data = utils::truncate(data);
    let mode = data.first().copied().unwrap_or(0);
    let body = data.get(1..).unwrap_or(&[]);

    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = dir.path().join("fuzz.log");
    let mut file = std::fs::File::create(&path).expect("failed to create log");
    if mode & 1 == 0 {
        // Keep the header valid so the record framing itself gets exercised.
        file.write_all(&MAP_MAGIC).expect("failed to write header");
        file.write_all(&LOG_FORMAT_VERSION.to_le_bytes())
            .expect("failed to write header");
        file.write_all(&SCHEMA_VERSION.to_le_bytes())
            .expect("failed to write header");
    }
    file.write_all(body).expect("failed to write body");
    drop(file);

    let open_mode = if mode & 2 == 0 {
        OpenMode::ReadWrite
    } else {
        OpenMode::ReadOnly
    };
    let Ok(mut map) = Map::open(&path, SCHEMA_VERSION, open_mode) else {
        return;
    };
    let keys: Vec<MethodKey> = map.keys().copied().collect();
    for key in &keys {
        let _ = map.get(key);
    }
    if !open_mode.is_read_only() {
        let _ = map.compact();
    }
    let _ = map.close();
});
