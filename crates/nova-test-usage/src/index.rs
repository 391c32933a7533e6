use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nova_storage::{
    read_version_stamp, remove_dir_contents, write_version_stamp, DirLock, OpenMode, StorageError,
};
use parking_lot::Mutex;

use crate::codec::TombstoneSet;
use crate::config::TestUsageConfig;
use crate::diff::diff;
use crate::error::{CloseFailure, Result, TestUsageError};
use crate::flush::FlushWorker;
use crate::ids::{ClassId, MethodId, MethodKey, ModuleId, TestId};
use crate::names::NameTables;
use crate::recovery::{open_with_recovery, OpenSteps};
use crate::report::{IndexDump, IndexStats, MethodDump, StoreCompaction, StructureStats};
use crate::snapshot::UsageSnapshot;
use crate::stores::{IndexStores, StoreKind};
use crate::trace::{TestTrace, TraceSink};

/// Version of the whole on-disk layout. Bumping it wipes existing indexes on open.
pub const INDEX_VERSION: u32 = 1;

pub const VERSION_FILE: &str = "index.version";
pub const LOCK_FILE: &str = ".lock";

type StorageResult<T> = std::result::Result<T, StorageError>;

/// A persistent index of which tests exercised which methods.
///
/// All structures sit behind one mutex; every operation takes it for its whole
/// duration, so updates touching several structures are never observed half
/// applied by other threads. Writes are buffered and made durable by a
/// background worker every [`TestUsageConfig::flush_interval`], by
/// [`TestUsageIndex::flush`], or on [`TestUsageIndex::dispose`].
///
/// Any operation on a disposed index panics.
#[derive(Debug)]
pub struct TestUsageIndex {
    shared: Arc<Shared>,
    worker: Mutex<Option<FlushWorker>>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    dir: PathBuf,
    mode: OpenMode,
    config: TestUsageConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    data: Option<IndexData>,
    lock: Option<DirLock>,
}

#[derive(Debug)]
struct IndexData {
    names: NameTables,
    stores: IndexStores,
}

impl TestUsageIndex {
    /// Opens (creating, upgrading or repairing as needed) the index in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, TestUsageConfig::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: TestUsageConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let lock = DirLock::try_acquire(&dir, LOCK_FILE)?;

        let mut steps = DiskSteps {
            dir: &dir,
            cache_capacity: config.name_cache_capacity,
        };
        let data = open_with_recovery(&mut steps, INDEX_VERSION, config.max_open_attempts)?;
        tracing::info!(
            target = "nova.test_usage",
            dir = %dir.display(),
            tests = data.names.tests.len(),
            methods = data.stores.method_tests.len(),
            "opened test usage index"
        );

        let interval = config.flush_interval();
        let shared = Arc::new(Shared {
            dir,
            mode: OpenMode::ReadWrite,
            config,
            inner: Mutex::new(Inner {
                data: Some(data),
                lock: Some(lock),
            }),
        });
        let worker = FlushWorker::spawn(Arc::downgrade(&shared), interval)?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Opens an existing index for inspection.
    ///
    /// Nothing is repaired: a missing or stale version stamp is
    /// [`TestUsageError::VersionMismatch`] and corruption is a storage error.
    /// Every mutation fails with [`StorageError::ReadOnly`].
    pub fn open_read_only(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_read_only_with_config(dir, TestUsageConfig::default())
    }

    pub fn open_read_only_with_config(
        dir: impl AsRef<Path>,
        config: TestUsageConfig,
    ) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let found = read_version_stamp(&dir.join(VERSION_FILE))?;
        if found != Some(INDEX_VERSION) {
            return Err(TestUsageError::VersionMismatch {
                expected: INDEX_VERSION,
                found,
            });
        }
        let data = IndexData::open(&dir, OpenMode::ReadOnly, config.name_cache_capacity)?;

        Ok(Self {
            shared: Arc::new(Shared {
                dir,
                mode: OpenMode::ReadOnly,
                config,
                inner: Mutex::new(Inner {
                    data: Some(data),
                    lock: None,
                }),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.mode.is_read_only()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.inner.lock().data.is_none()
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut IndexData) -> StorageResult<R>) -> Result<R> {
        let mut inner = self.shared.inner.lock();
        let Some(data) = inner.data.as_mut() else {
            panic!(
                "test usage index at {} used after dispose",
                self.shared.dir.display()
            );
        };
        Ok(f(data)?)
    }

    /// Records that `test` now touches `current` instead of `previous`.
    ///
    /// Only the difference is written: retractions for pairs that disappeared,
    /// additions for new pairs (plus `module` under each added pair), and the
    /// new snapshot. Returns `false` without writing anything when nothing
    /// changed.
    pub fn update_from_test(
        &self,
        test: TestId,
        current: Option<&UsageSnapshot>,
        previous: Option<&UsageSnapshot>,
        module: Option<ModuleId>,
    ) -> Result<bool> {
        self.with_data(|data| data.update_from_test(test, current, previous, module))
    }

    /// Interns the names of `trace` and applies it against the stored snapshot.
    pub fn update_from_trace(&self, trace: &TestTrace) -> Result<bool> {
        self.with_data(|data| data.update_from_trace(trace))
    }

    /// Retracts everything recorded for the test and drops its snapshot.
    pub fn remove_test(&self, test: &str) -> Result<bool> {
        self.with_data(|data| {
            let Some(test) = data.names.tests.lookup_existing(test)? else {
                return Ok(false);
            };
            let previous = data.stores.test_snapshots.get(&test)?;
            data.update_from_test(test, None, previous.as_ref(), None)
        })
    }

    pub fn has_test_trace(&self, test: &str) -> Result<bool> {
        self.with_data(|data| match data.names.tests.lookup_existing(test)? {
            Some(test) => Ok(data.stores.test_snapshots.contains_key(&test)),
            None => Ok(false),
        })
    }

    pub fn snapshot(&self, test: TestId) -> Result<Option<UsageSnapshot>> {
        self.with_data(|data| data.stores.test_snapshots.get(&test))
    }

    /// The latest recorded usage of `test`, resolved to names.
    pub fn usage_of_test(
        &self,
        test: &str,
    ) -> Result<Option<BTreeMap<String, BTreeSet<String>>>> {
        self.with_data(|data| {
            let Some(test) = data.names.tests.lookup_existing(test)? else {
                return Ok(None);
            };
            match data.stores.test_snapshots.get(&test)? {
                Some(snapshot) => data.resolve_snapshot(&snapshot).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Tests known to exercise `(class, method)`, ascending by id.
    pub fn test_ids_for_method(&self, class: ClassId, method: MethodId) -> Result<Vec<TestId>> {
        self.with_data(|data| data.test_ids_for(MethodKey::new(class, method)))
    }

    pub fn tests_for_method(&self, class: &str, method: &str) -> Result<Vec<String>> {
        self.with_data(|data| {
            let Some(key) = data.existing_key(class, method)? else {
                return Ok(Vec::new());
            };
            let tests = data.test_ids_for(key)?;
            tests
                .into_iter()
                .map(|test| Ok(data.names.tests.resolve(test)?.to_string()))
                .collect()
        })
    }

    pub fn module_ids_for_method(
        &self,
        class: ClassId,
        method: MethodId,
    ) -> Result<Vec<ModuleId>> {
        self.with_data(|data| data.module_ids_for(MethodKey::new(class, method)))
    }

    pub fn modules_for_method(&self, class: &str, method: &str) -> Result<Vec<String>> {
        self.with_data(|data| {
            let Some(key) = data.existing_key(class, method)? else {
                return Ok(Vec::new());
            };
            let modules = data.module_ids_for(key)?;
            modules
                .into_iter()
                .map(|module| Ok(data.names.modules.resolve(module)?.to_string()))
                .collect()
        })
    }

    pub fn intern_class(&self, name: &str) -> Result<ClassId> {
        self.with_data(|data| data.names.classes.intern(name))
    }

    pub fn intern_method(&self, name: &str) -> Result<MethodId> {
        self.with_data(|data| data.names.methods.intern(name))
    }

    pub fn intern_test(&self, name: &str) -> Result<TestId> {
        self.with_data(|data| data.names.tests.intern(name))
    }

    pub fn intern_module(&self, name: &str) -> Result<ModuleId> {
        self.with_data(|data| data.names.modules.intern(name))
    }

    /// Makes every buffered write durable now.
    pub fn flush(&self) -> Result<()> {
        self.with_data(|data| data.flush_dirty().map(|_| ()))
    }

    /// Rewrites all three stores, dropping superseded records and retracted ids.
    pub fn compact(&self) -> Result<Vec<StoreCompaction>> {
        let read_only = self.is_read_only();
        self.with_data(|data| {
            if read_only {
                return Err(StorageError::ReadOnly);
            }
            StoreKind::ALL
                .into_iter()
                .map(|kind| {
                    let report = data.stores.compact(kind)?;
                    Ok(StoreCompaction::new(kind.file_name(), report))
                })
                .collect()
        })
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let read_only = self.is_read_only();
        self.with_data(|data| {
            let names = &data.names;
            let name_stats = vec![
                names.classes.stats(),
                names.methods.stats(),
                names.tests.stats(),
                names.modules.stats(),
            ];
            let store_stats = StoreKind::ALL
                .into_iter()
                .map(|kind| {
                    let stats = data.stores.stats(kind);
                    StructureStats {
                        file: kind.file_name(),
                        entries: stats.keys,
                        log_bytes: stats.log_bytes,
                        dirty: stats.dirty,
                    }
                })
                .collect();
            Ok(IndexStats {
                dir: self.shared.dir.clone(),
                version: INDEX_VERSION,
                read_only,
                names: name_stats,
                stores: store_stats,
            })
        })
    }

    /// Exports every snapshot and inverted-index entry, resolved to names.
    pub fn dump(&self) -> Result<IndexDump> {
        self.with_data(|data| data.dump())
    }

    /// Flushes and closes every structure and stops the background worker.
    ///
    /// Stores that have grown mostly stale are compacted first. Failures do not
    /// stop the remaining structures from closing; they are reported together as
    /// [`TestUsageError::Close`].
    ///
    /// # Panics
    /// If the index was already disposed.
    pub fn dispose(&self) -> Result<()> {
        let failures = {
            let mut inner = self.shared.inner.lock();
            let data = inner.data.take().unwrap_or_else(|| {
                panic!("test usage index at {} disposed twice", self.shared.dir.display())
            });
            let failures = data.close(&self.shared.config, self.shared.mode);
            inner.lock = None;
            failures
        };
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }

        if failures.is_empty() {
            tracing::debug!(
                target = "nova.test_usage",
                dir = %self.shared.dir.display(),
                "disposed test usage index"
            );
            Ok(())
        } else {
            Err(TestUsageError::Close { failures })
        }
    }
}

impl Drop for TestUsageIndex {
    fn drop(&mut self) {
        if self.is_disposed() {
            return;
        }
        if let Err(err) = self.dispose() {
            tracing::error!(
                target = "nova.test_usage",
                dir = %self.shared.dir.display(),
                error = %err,
                "failed to close test usage index"
            );
        }
    }
}

impl TraceSink for TestUsageIndex {
    fn test_finished(&self, trace: &TestTrace) -> Result<()> {
        self.update_from_trace(trace).map(|_| ())
    }
}

impl Shared {
    /// One background maintenance pass; returns `false` once the index is disposed.
    pub(crate) fn flush_cycle(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(data) = inner.data.as_mut() else {
            return false;
        };
        match data.flush_dirty() {
            Ok(0) => {}
            Ok(flushed) => tracing::debug!(
                target = "nova.test_usage",
                dir = %self.dir.display(),
                flushed,
                "flushed test usage index"
            ),
            Err(err) => tracing::error!(
                target = "nova.test_usage",
                dir = %self.dir.display(),
                error = %err,
                "background flush of test usage index failed"
            ),
        }
        data.names.clear_caches();
        true
    }
}

struct DiskSteps<'a> {
    dir: &'a Path,
    cache_capacity: usize,
}

impl OpenSteps for DiskSteps<'_> {
    type Opened = IndexData;

    fn read_version(&mut self) -> StorageResult<Option<u32>> {
        read_version_stamp(&self.dir.join(VERSION_FILE))
    }

    fn rebuild(&mut self) -> StorageResult<()> {
        remove_dir_contents(self.dir, &[LOCK_FILE])?;
        write_version_stamp(&self.dir.join(VERSION_FILE), INDEX_VERSION)
    }

    fn open_stores(&mut self) -> StorageResult<IndexData> {
        IndexData::open(self.dir, OpenMode::ReadWrite, self.cache_capacity)
    }
}

impl IndexData {
    fn open(dir: &Path, mode: OpenMode, cache_capacity: usize) -> StorageResult<Self> {
        // Structures opened before a failing one are dropped without writing anything.
        let names = NameTables::open(dir, mode, cache_capacity)?;
        let stores = IndexStores::open(dir, mode)?;
        Ok(Self { names, stores })
    }

    fn update_from_test(
        &mut self,
        test: TestId,
        current: Option<&UsageSnapshot>,
        previous: Option<&UsageSnapshot>,
        module: Option<ModuleId>,
    ) -> StorageResult<bool> {
        let delta = diff(current, previous);
        if delta.is_empty() {
            return Ok(false);
        }

        for key in delta.removed.method_keys() {
            self.stores
                .method_tests
                .append_with(key, |out| TombstoneSet::encode_retract(test, out))?;
        }
        for key in delta.added_or_changed.method_keys() {
            self.stores
                .method_tests
                .append_with(key, |out| TombstoneSet::encode_add(test, out))?;
            if let Some(module) = module {
                self.stores
                    .method_modules
                    .append_with(key, |out| TombstoneSet::encode_add(module, out))?;
            }
        }

        match current {
            Some(current) if !current.is_empty() => {
                self.stores.test_snapshots.put(test, current)?;
            }
            _ => {
                self.stores.test_snapshots.remove(&test)?;
            }
        }

        tracing::trace!(
            target = "nova.test_usage",
            test = test.to_raw(),
            added = delta.added_or_changed.pair_count(),
            removed = delta.removed.pair_count(),
            "updated test usage"
        );
        Ok(true)
    }

    fn update_from_trace(&mut self, trace: &TestTrace) -> StorageResult<bool> {
        let test = if trace.is_empty() {
            // A test that never touched anything only matters if it did before.
            match self.names.tests.lookup_existing(&trace.test)? {
                Some(test) => test,
                None => return Ok(false),
            }
        } else {
            self.names.tests.intern(&trace.test)?
        };

        let current = if trace.is_empty() {
            None
        } else {
            let mut snapshot = UsageSnapshot::new();
            for (class, methods) in &trace.classes {
                if methods.is_empty() {
                    continue;
                }
                let class = self.names.classes.intern(class)?;
                for method in methods {
                    let method = self.names.methods.intern(method)?;
                    snapshot.insert(class, method);
                }
            }
            Some(snapshot)
        };
        let module = match &trace.module {
            Some(module) if current.is_some() => Some(self.names.modules.intern(module)?),
            _ => None,
        };

        let previous = self.stores.test_snapshots.get(&test)?;
        self.update_from_test(test, current.as_ref(), previous.as_ref(), module)
    }

    fn existing_key(&mut self, class: &str, method: &str) -> StorageResult<Option<MethodKey>> {
        let Some(class) = self.names.classes.lookup_existing(class)? else {
            return Ok(None);
        };
        let Some(method) = self.names.methods.lookup_existing(method)? else {
            return Ok(None);
        };
        Ok(Some(MethodKey::new(class, method)))
    }

    fn test_ids_for(&self, key: MethodKey) -> StorageResult<Vec<TestId>> {
        Ok(self
            .stores
            .method_tests
            .get(&key)?
            .map(|tests| tests.members().collect())
            .unwrap_or_default())
    }

    fn module_ids_for(&self, key: MethodKey) -> StorageResult<Vec<ModuleId>> {
        Ok(self
            .stores
            .method_modules
            .get(&key)?
            .map(|modules| modules.members().collect())
            .unwrap_or_default())
    }

    fn resolve_snapshot(
        &mut self,
        snapshot: &UsageSnapshot,
    ) -> StorageResult<BTreeMap<String, BTreeSet<String>>> {
        let mut out = BTreeMap::new();
        for (&class, methods) in snapshot {
            let class = self.names.classes.resolve(class)?.to_string();
            let mut names = BTreeSet::new();
            for &method in methods {
                names.insert(self.names.methods.resolve(method)?.to_string());
            }
            out.insert(class, names);
        }
        Ok(out)
    }

    fn dump(&mut self) -> StorageResult<IndexDump> {
        let mut dump = IndexDump::default();

        let tests: Vec<TestId> = self.stores.test_snapshots.keys().copied().collect();
        for test in tests {
            let Some(snapshot) = self.stores.test_snapshots.get(&test)? else {
                continue;
            };
            let name = self.names.tests.resolve(test)?.to_string();
            let usage = self.resolve_snapshot(&snapshot)?;
            dump.tests.insert(name, usage);
        }

        let keys: Vec<MethodKey> = self.stores.method_tests.keys().copied().collect();
        for key in keys {
            let tests = self.test_ids_for(key)?;
            if tests.is_empty() {
                continue;
            }
            let mut entry = MethodDump::default();
            for test in tests {
                entry.tests.insert(self.names.tests.resolve(test)?.to_string());
            }
            for module in self.module_ids_for(key)? {
                entry
                    .modules
                    .insert(self.names.modules.resolve(module)?.to_string());
            }
            let class = self.names.classes.resolve(key.class())?;
            let method = self.names.methods.resolve(key.method())?;
            dump.methods.insert(format!("{class}#{method}"), entry);
        }
        Ok(dump)
    }

    fn flush_dirty(&mut self) -> StorageResult<usize> {
        Ok(self.names.flush_dirty()? + self.stores.flush_dirty()?)
    }

    /// Closes everything, compacting stale stores first; returns every failure.
    fn close(mut self, config: &TestUsageConfig, mode: OpenMode) -> Vec<CloseFailure> {
        let mut failures = Vec::new();
        if !mode.is_read_only() {
            let policy = config.compaction.policy();
            for kind in StoreKind::ALL {
                if !self.stores.needs_compaction(kind, &policy) {
                    continue;
                }
                if let Err(error) = self.stores.compact(kind) {
                    failures.push(CloseFailure {
                        structure: kind.file_name(),
                        error,
                    });
                }
            }
        }
        self.names.close_into(&mut failures);
        self.stores.close_into(&mut failures);
        failures
    }
}
