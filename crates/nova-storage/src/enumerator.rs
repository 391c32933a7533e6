use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;

use crate::record_log::{hash64, LogFormat, OpenMode, RecordLog, RecordTag};
use crate::StorageError;

pub const ENUMERATOR_MAGIC: [u8; 8] = *b"NOVAENUM";

const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct NameExtent {
    offset: u64,
    len: u32,
}

/// A persistent, append-only bijection between strings and dense `u32` ids.
///
/// Ids are assigned in insertion order starting at 1; an id is never reused or
/// reassigned. The name bytes live in the backing [`RecordLog`]; memory holds
/// only their offsets, a hash index, and two bounded LRU caches.
#[derive(Debug)]
pub struct StringEnumerator {
    log: RecordLog,
    extents: Vec<NameExtent>,
    buckets: HashMap<u64, Vec<u32>>,
    by_id: LruCache<u32, Arc<str>>,
    by_name: LruCache<Arc<str>, u32>,
}

impl StringEnumerator {
    pub fn open(path: &Path, schema_version: u32, mode: OpenMode) -> Result<Self, StorageError> {
        Self::open_with_cache_capacity(path, schema_version, mode, DEFAULT_CACHE_CAPACITY)
    }

    pub fn open_with_cache_capacity(
        path: &Path,
        schema_version: u32,
        mode: OpenMode,
        cache_capacity: usize,
    ) -> Result<Self, StorageError> {
        let format = LogFormat {
            magic: ENUMERATOR_MAGIC,
            schema_version,
        };
        let mut extents = Vec::new();
        let mut buckets: HashMap<u64, Vec<u32>> = HashMap::new();
        let log = RecordLog::open(path, format, mode, |record| {
            if record.tag != RecordTag::Name {
                return Err(StorageError::CorruptRecord {
                    offset: record.payload_offset,
                    reason: "unexpected record tag in enumerator",
                });
            }
            if std::str::from_utf8(record.payload).is_err() {
                return Err(StorageError::CorruptRecord {
                    offset: record.payload_offset,
                    reason: "name is not valid UTF-8",
                });
            }
            extents.push(NameExtent {
                offset: record.payload_offset,
                len: record.payload.len() as u32,
            });
            let id = extents.len() as u32;
            buckets.entry(hash64(record.payload)).or_default().push(id);
            Ok(())
        })?;

        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            log,
            extents,
            buckets,
            by_id: LruCache::new(capacity),
            by_name: LruCache::new(capacity),
        })
    }

    /// Number of names stored.
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Returns the id of `name`, assigning the next id if it has none yet.
    pub fn enumerate(&mut self, name: &str) -> Result<u32, StorageError> {
        if let Some(id) = self.try_enumerate(name)? {
            return Ok(id);
        }

        let next = self
            .extents
            .len()
            .checked_add(1)
            .and_then(|next| u32::try_from(next).ok())
            .ok_or(StorageError::IdSpaceExhausted)?;
        let offset = self
            .log
            .append(RecordTag::Name, |buf| buf.extend_from_slice(name.as_bytes()))?;
        self.extents.push(NameExtent {
            offset,
            len: name.len() as u32,
        });
        self.buckets
            .entry(hash64(name.as_bytes()))
            .or_default()
            .push(next);

        let name: Arc<str> = Arc::from(name);
        self.by_name.put(name.clone(), next);
        self.by_id.put(next, name);
        Ok(next)
    }

    /// Looks `name` up without assigning an id.
    pub fn try_enumerate(&mut self, name: &str) -> Result<Option<u32>, StorageError> {
        if let Some(id) = self.by_name.get(name) {
            return Ok(Some(*id));
        }

        let Some(candidates) = self.buckets.get(&hash64(name.as_bytes())) else {
            return Ok(None);
        };
        for &id in candidates {
            let extent = self.extents[(id - 1) as usize];
            if extent.len as usize != name.len() {
                continue;
            }
            let stored = self.log.read_at(extent.offset, extent.len as usize)?;
            if stored == name.as_bytes() {
                self.by_name.put(Arc::from(name), id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Returns the name with the given id, if it was ever assigned.
    pub fn value_of(&mut self, id: u32) -> Result<Option<Arc<str>>, StorageError> {
        if let Some(name) = self.by_id.get(&id) {
            return Ok(Some(name.clone()));
        }
        let Some(extent) = id
            .checked_sub(1)
            .and_then(|index| self.extents.get(index as usize))
            .copied()
        else {
            return Ok(None);
        };

        let bytes = self.log.read_at(extent.offset, extent.len as usize)?;
        let name = String::from_utf8(bytes).map_err(|_| StorageError::CorruptRecord {
            offset: extent.offset,
            reason: "name is not valid UTF-8",
        })?;
        let name: Arc<str> = Arc::from(name);
        self.by_id.put(id, name.clone());
        Ok(Some(name))
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    pub fn log_bytes(&self) -> u64 {
        self.log.len()
    }

    pub fn force_flush(&mut self) -> Result<(), StorageError> {
        self.log.force_flush()
    }

    /// Drops both lookup caches; lookups fall back to the log afterwards.
    pub fn clear_cache(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.log.close()
    }
}
