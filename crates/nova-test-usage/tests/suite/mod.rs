mod codec_proptest;
mod recovery;
mod update_scenarios;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use nova_test_usage::{TestUsageConfig, TestUsageIndex};

/// Config whose background worker stays out of the way of the test.
pub(crate) fn quiet_config() -> TestUsageConfig {
    TestUsageConfig {
        flush_interval_ms: 60 * 60 * 1000,
        ..TestUsageConfig::default()
    }
}

pub(crate) fn open(dir: &Path) -> TestUsageIndex {
    TestUsageIndex::open_with_config(dir, quiet_config()).unwrap()
}

pub(crate) fn usage(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
    pairs
        .iter()
        .map(|(class, methods)| {
            (
                class.to_string(),
                methods.iter().map(|m| m.to_string()).collect(),
            )
        })
        .collect()
}
