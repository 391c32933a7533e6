use std::path::Path;

use nova_storage::{
    CompactionPolicy, CompactionReport, MapStats, OpenMode, PersistentMap, StorageError,
};

use crate::codec::TombstoneSet;
use crate::error::CloseFailure;
use crate::ids::{MethodKey, ModuleId, TestId};
use crate::snapshot::UsageSnapshot;

pub const METHOD_TESTS_FILE: &str = "method_tests.log";
pub const TEST_SNAPSHOTS_FILE: &str = "test_snapshots.log";
pub const METHOD_MODULES_FILE: &str = "method_modules.log";

// Encoding versions of the three maps.
const METHOD_TESTS_SCHEMA_VERSION: u32 = 1;
const TEST_SNAPSHOTS_SCHEMA_VERSION: u32 = 1;
const METHOD_MODULES_SCHEMA_VERSION: u32 = 1;

/// Inverted index: method → tests that exercised it.
pub type MethodTestsMap = PersistentMap<MethodKey, TombstoneSet<TestId>>;
/// Latest recorded usage per test.
pub type TestSnapshotsMap = PersistentMap<TestId, UsageSnapshot>;
/// Nearest build module, recorded under the method key of each added pair.
pub type MethodModulesMap = PersistentMap<MethodKey, TombstoneSet<ModuleId>>;

#[derive(Debug)]
pub struct IndexStores {
    pub method_tests: MethodTestsMap,
    pub test_snapshots: TestSnapshotsMap,
    pub method_modules: MethodModulesMap,
}

/// Which of the three maps an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    MethodTests,
    TestSnapshots,
    MethodModules,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [
        StoreKind::MethodTests,
        StoreKind::TestSnapshots,
        StoreKind::MethodModules,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            StoreKind::MethodTests => METHOD_TESTS_FILE,
            StoreKind::TestSnapshots => TEST_SNAPSHOTS_FILE,
            StoreKind::MethodModules => METHOD_MODULES_FILE,
        }
    }
}

impl IndexStores {
    pub fn open(dir: &Path, mode: OpenMode) -> Result<Self, StorageError> {
        Ok(Self {
            method_tests: PersistentMap::open(
                &dir.join(METHOD_TESTS_FILE),
                METHOD_TESTS_SCHEMA_VERSION,
                mode,
            )?,
            test_snapshots: PersistentMap::open(
                &dir.join(TEST_SNAPSHOTS_FILE),
                TEST_SNAPSHOTS_SCHEMA_VERSION,
                mode,
            )?,
            method_modules: PersistentMap::open(
                &dir.join(METHOD_MODULES_FILE),
                METHOD_MODULES_SCHEMA_VERSION,
                mode,
            )?,
        })
    }

    /// Flushes every dirty map; returns how many were flushed.
    pub fn flush_dirty(&mut self) -> Result<usize, StorageError> {
        let mut flushed = 0;
        if self.method_tests.is_dirty() {
            self.method_tests.force_flush()?;
            flushed += 1;
        }
        if self.test_snapshots.is_dirty() {
            self.test_snapshots.force_flush()?;
            flushed += 1;
        }
        if self.method_modules.is_dirty() {
            self.method_modules.force_flush()?;
            flushed += 1;
        }
        Ok(flushed)
    }

    pub fn stats(&self, kind: StoreKind) -> MapStats {
        match kind {
            StoreKind::MethodTests => self.method_tests.stats(),
            StoreKind::TestSnapshots => self.test_snapshots.stats(),
            StoreKind::MethodModules => self.method_modules.stats(),
        }
    }

    pub fn needs_compaction(&self, kind: StoreKind, policy: &CompactionPolicy) -> bool {
        match kind {
            StoreKind::MethodTests => self.method_tests.needs_compaction(policy),
            StoreKind::TestSnapshots => self.test_snapshots.needs_compaction(policy),
            StoreKind::MethodModules => self.method_modules.needs_compaction(policy),
        }
    }

    pub fn compact(&mut self, kind: StoreKind) -> Result<CompactionReport, StorageError> {
        match kind {
            StoreKind::MethodTests => self.method_tests.compact(),
            StoreKind::TestSnapshots => self.test_snapshots.compact(),
            StoreKind::MethodModules => self.method_modules.compact(),
        }
    }

    /// Closes every map, recording failures instead of stopping at the first.
    pub fn close_into(self, failures: &mut Vec<CloseFailure>) {
        let results = [
            (METHOD_TESTS_FILE, self.method_tests.close()),
            (TEST_SNAPSHOTS_FILE, self.test_snapshots.close()),
            (METHOD_MODULES_FILE, self.method_modules.close()),
        ];
        for (structure, result) in results {
            if let Err(error) = result {
                failures.push(CloseFailure { structure, error });
            }
        }
    }
}
