#![no_main]

use libfuzzer_sys::fuzz_target;
use nova_test_usage::codec::{decode_snapshot, encode_snapshot, TombstoneSet};
use nova_test_usage::TestId;

mod utils;

fuzz_target!(|data: &[u8]| {
    let data = utils::truncate(data);

    if let Ok(snapshot) = decode_snapshot(data) {
        let mut bytes = Vec::new();
        encode_snapshot(&snapshot, &mut bytes);
        let again = decode_snapshot(&bytes).expect("re-encoded snapshot must decode");
        assert_eq!(again, snapshot);
    }

    if let Ok(set) = TombstoneSet::<TestId>::decode(data) {
        // Members are never placeholders, so a rewrite keeps exactly the members.
        let mut bytes = Vec::new();
        for id in set.members() {
            TombstoneSet::encode_add(id, &mut bytes);
        }
        let again = TombstoneSet::<TestId>::decode(&bytes).expect("members must re-decode");
        assert!(again.members().eq(set.members()));
        assert_eq!(again.placeholder_count(), 0);
    }
});
