//! Incremental index of which tests exercised which methods.
//!
//! Test runs report, per finished test, the classes and methods it touched
//! ([`TestTrace`]). The index keeps the latest usage snapshot per test and the
//! inverted relation "method → tests", updating both with the difference
//! against the previous snapshot rather than rewriting history.
//!
//! ## On-disk layout (inventory)
//!
//! One directory per index, built on `nova-storage` record logs:
//! - `index.version`: `u32` LE layout version ([`INDEX_VERSION`]); a mismatch wipes
//!   and rebuilds the whole directory
//! - `class.names`, `method.names`, `test.names`, `module.names`: interning tables
//! - `method_tests.log`: method key → tombstone set of test ids
//! - `test_snapshots.log`: test id → delta-encoded usage snapshot
//! - `method_modules.log`: method key → tombstone set of module ids
//! - `.lock`: held by the writer for the lifetime of a [`TestUsageIndex`]
//!
//! Method keys pack the class id into the high and the method id into the low
//! 32 bits of a big-endian `u64`. The value encodings are described in [`codec`].

pub mod codec;
mod config;
mod diff;
mod error;
mod flush;
mod ids;
mod index;
mod names;
mod recovery;
mod report;
mod snapshot;
mod stores;
mod trace;

pub use config::{CompactionConfig, TestUsageConfig, FLUSH_INTERVAL_ENV_VAR};
pub use diff::{diff, UsageDiff};
pub use error::{CloseFailure, Result, TestUsageError};
pub use ids::{ClassId, MethodId, MethodKey, ModuleId, RawId, TestId};
pub use index::{TestUsageIndex, INDEX_VERSION, LOCK_FILE, VERSION_FILE};
pub use names::{CLASS_NAMES_FILE, METHOD_NAMES_FILE, MODULE_NAMES_FILE, TEST_NAMES_FILE};
pub use report::{IndexDump, IndexStats, MethodDump, StoreCompaction, StructureStats};
pub use snapshot::UsageSnapshot;
pub use stores::{METHOD_MODULES_FILE, METHOD_TESTS_FILE, TEST_SNAPSHOTS_FILE};
pub use trace::{parse_traces, read_trace_file, TestTrace, TraceSink};
