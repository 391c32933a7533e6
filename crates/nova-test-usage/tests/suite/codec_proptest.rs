use std::collections::BTreeSet;

use nova_test_usage::codec::{decode_snapshot, encode_snapshot, TombstoneSet};
use nova_test_usage::{ClassId, MethodId, TestId, UsageSnapshot};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Edit {
    Add(u32),
    Retract(u32),
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (1u32..40).prop_map(Edit::Add),
        (1u32..40).prop_map(Edit::Retract),
    ]
}

fn arb_snapshot() -> impl Strategy<Value = UsageSnapshot> {
    proptest::collection::vec((1u32..u32::MAX, 1u32..u32::MAX), 0..48).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(class, method)| (ClassId::from_raw(class), MethodId::from_raw(method)))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn tombstone_set_replays_like_a_plain_set(edits in proptest::collection::vec(arb_edit(), 0..64)) {
        let mut log = Vec::new();
        let mut model = BTreeSet::new();
        for edit in &edits {
            match *edit {
                Edit::Add(id) => {
                    TombstoneSet::encode_add(TestId::from_raw(id), &mut log);
                    model.insert(id);
                }
                Edit::Retract(id) => {
                    TombstoneSet::encode_retract(TestId::from_raw(id), &mut log);
                    model.remove(&id);
                }
            }
        }

        let set = TombstoneSet::<TestId>::decode(&log).unwrap();
        let members: BTreeSet<u32> = set.members().map(TestId::to_raw).collect();
        prop_assert_eq!(&members, &model);
        prop_assert_eq!(set.is_empty(), model.is_empty());
    }

    #[test]
    fn snapshot_encoding_round_trips(snapshot in arb_snapshot()) {
        let mut bytes = Vec::new();
        encode_snapshot(&snapshot, &mut bytes);
        let decoded = decode_snapshot(&bytes).unwrap();
        prop_assert_eq!(decoded, snapshot);
    }

    #[test]
    fn tombstone_decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok(set) = TombstoneSet::<TestId>::decode(&bytes) {
            let mut rewritten = Vec::new();
            for id in set.members() {
                TombstoneSet::encode_add(id, &mut rewritten);
            }
            let again = TombstoneSet::<TestId>::decode(&rewritten).unwrap();
            prop_assert!(again.members().eq(set.members()));
        }
    }

    #[test]
    fn snapshot_decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok(snapshot) = decode_snapshot(&bytes) {
            let mut reencoded = Vec::new();
            encode_snapshot(&snapshot, &mut reencoded);
            prop_assert_eq!(decode_snapshot(&reencoded).unwrap(), snapshot);
        }
    }
}
