use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use nova_storage::CompactionReport;
use serde::Serialize;

/// Sizes of every structure of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub dir: PathBuf,
    pub version: u32,
    pub read_only: bool,
    pub names: Vec<StructureStats>,
    pub stores: Vec<StructureStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureStats {
    pub file: &'static str,
    /// Interned names for a table, live keys for a store.
    pub entries: usize,
    pub log_bytes: u64,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCompaction {
    pub file: &'static str,
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub keys: usize,
}

impl StoreCompaction {
    pub(crate) fn new(file: &'static str, report: CompactionReport) -> Self {
        Self {
            file,
            before_bytes: report.before_bytes,
            after_bytes: report.after_bytes,
            keys: report.keys,
        }
    }
}

/// Everything an index knows, resolved to names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexDump {
    /// Latest recorded usage per test: class → methods.
    pub tests: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    /// Inverted index, keyed by `class#method`.
    pub methods: BTreeMap<String, MethodDump>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodDump {
    pub tests: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub modules: BTreeSet<String>,
}
