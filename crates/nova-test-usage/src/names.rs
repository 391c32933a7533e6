use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use nova_storage::{OpenMode, StorageError, StringEnumerator};

use crate::error::CloseFailure;
use crate::ids::{ClassId, MethodId, ModuleId, RawId, TestId};
use crate::report::StructureStats;

pub const CLASS_NAMES_FILE: &str = "class.names";
pub const METHOD_NAMES_FILE: &str = "method.names";
pub const TEST_NAMES_FILE: &str = "test.names";
pub const MODULE_NAMES_FILE: &str = "module.names";

/// Encoding version of the interning tables.
const NAMES_SCHEMA_VERSION: u32 = 1;

/// An interning table producing ids of type `T`.
#[derive(Debug)]
pub struct NameTable<T> {
    file_name: &'static str,
    names: StringEnumerator,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RawId> NameTable<T> {
    fn open(
        dir: &Path,
        file_name: &'static str,
        mode: OpenMode,
        cache_capacity: usize,
    ) -> Result<Self, StorageError> {
        let names = StringEnumerator::open_with_cache_capacity(
            &dir.join(file_name),
            NAMES_SCHEMA_VERSION,
            mode,
            cache_capacity,
        )?;
        Ok(Self {
            file_name,
            names,
            _marker: PhantomData,
        })
    }

    /// Returns the id of `name`, assigning one on first sight.
    pub fn intern(&mut self, name: &str) -> Result<T, StorageError> {
        self.names.enumerate(name).map(T::from_raw)
    }

    /// Returns the id of `name` only if it was interned before.
    pub fn lookup_existing(&mut self, name: &str) -> Result<Option<T>, StorageError> {
        Ok(self.names.try_enumerate(name)?.map(T::from_raw))
    }

    pub fn lookup(&mut self, id: T) -> Result<Option<Arc<str>>, StorageError> {
        self.names.value_of(id.to_raw())
    }

    /// Like [`NameTable::lookup`], but a dangling id is reported as corruption.
    pub fn resolve(&mut self, id: T) -> Result<Arc<str>, StorageError> {
        self.lookup(id)?.ok_or_else(|| {
            StorageError::Decode(format!("{} has no entry for {id:?}", self.file_name))
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.names.is_dirty()
    }

    pub fn force_flush(&mut self) -> Result<(), StorageError> {
        self.names.force_flush()
    }

    pub fn clear_cache(&mut self) {
        self.names.clear_cache();
    }

    pub fn stats(&self) -> StructureStats {
        StructureStats {
            file: self.file_name,
            entries: self.names.len(),
            log_bytes: self.names.log_bytes(),
            dirty: self.names.is_dirty(),
        }
    }

    fn close_into(self, failures: &mut Vec<CloseFailure>) {
        if let Err(error) = self.names.close() {
            failures.push(CloseFailure {
                structure: self.file_name,
                error,
            });
        }
    }
}

/// The four interning tables of one index.
#[derive(Debug)]
pub struct NameTables {
    pub classes: NameTable<ClassId>,
    pub methods: NameTable<MethodId>,
    pub tests: NameTable<TestId>,
    pub modules: NameTable<ModuleId>,
}

impl NameTables {
    pub fn open(dir: &Path, mode: OpenMode, cache_capacity: usize) -> Result<Self, StorageError> {
        Ok(Self {
            classes: NameTable::open(dir, CLASS_NAMES_FILE, mode, cache_capacity)?,
            methods: NameTable::open(dir, METHOD_NAMES_FILE, mode, cache_capacity)?,
            tests: NameTable::open(dir, TEST_NAMES_FILE, mode, cache_capacity)?,
            modules: NameTable::open(dir, MODULE_NAMES_FILE, mode, cache_capacity)?,
        })
    }

    /// Flushes every dirty table; returns how many were flushed.
    pub fn flush_dirty(&mut self) -> Result<usize, StorageError> {
        let mut flushed = 0;
        flushed += flush_if_dirty(&mut self.classes)?;
        flushed += flush_if_dirty(&mut self.methods)?;
        flushed += flush_if_dirty(&mut self.tests)?;
        flushed += flush_if_dirty(&mut self.modules)?;
        Ok(flushed)
    }

    pub fn clear_caches(&mut self) {
        self.classes.clear_cache();
        self.methods.clear_cache();
        self.tests.clear_cache();
        self.modules.clear_cache();
    }

    /// Closes every table, recording failures instead of stopping at the first.
    pub fn close_into(self, failures: &mut Vec<CloseFailure>) {
        self.classes.close_into(failures);
        self.methods.close_into(failures);
        self.tests.close_into(failures);
        self.modules.close_into(failures);
    }
}

fn flush_if_dirty<T: RawId>(table: &mut NameTable<T>) -> Result<usize, StorageError> {
    if !table.is_dirty() {
        return Ok(0);
    }
    table.force_flush()?;
    Ok(1)
}
