use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::Path;

use crate::record_log::{
    record_len, LogFormat, OpenMode, RecordLog, RecordTag, RecordView, LOG_HEADER_LEN,
};
use crate::varint::{decode_varint, encode_varint};
use crate::StorageError;

pub const MAP_MAGIC: [u8; 8] = *b"NOVAPMAP";

/// Fixed-layout key serialization for [`PersistentMap`].
pub trait KeyCodec: Sized + Eq + Hash + Clone {
    fn encode_key(&self, out: &mut Vec<u8>);
    fn decode_key(bytes: &[u8]) -> Result<Self, StorageError>;
}

/// Value serialization for [`PersistentMap`].
///
/// For maps used with [`PersistentMap::append_with`], `decode_value` receives the
/// concatenation of every appended chunk since the last `put`, and must be able to
/// replay it. `encode_value` then produces the compacted form.
pub trait ValueCodec: Sized {
    fn encode_value(&self, out: &mut Vec<u8>);
    fn decode_value(bytes: &[u8]) -> Result<Self, StorageError>;
}

/// When a map is worth compacting; see [`PersistentMap::needs_compaction`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    /// Logs smaller than this are never compacted.
    pub min_bytes: u64,
    /// Compact once less than this fraction of the log is already in compact form.
    pub min_live_ratio: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            min_bytes: 1024 * 1024,
            min_live_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub keys: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    pub keys: usize,
    pub log_bytes: u64,
    pub dirty: bool,
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u32,
    /// Size of the whole record that carried this extent.
    record_len: u32,
}

#[derive(Debug, Default)]
struct Entry {
    extents: Vec<Extent>,
    /// Set once any extent came from an `APPEND`; the bytes may then hold
    /// state the codec drops on re-encoding.
    appended: bool,
}

impl Entry {
    fn put(extent: Extent) -> Self {
        Self {
            extents: vec![extent],
            appended: false,
        }
    }

    fn push_append(&mut self, extent: Extent) {
        self.extents.push(extent);
        self.appended = true;
    }

    fn value_len(&self) -> usize {
        self.extents.iter().map(|e| e.len as usize).sum()
    }
}

/// A crash-tolerant key-value map persisted as a [`RecordLog`].
///
/// Every mutation is a record: `PUT` replaces the value, `APPEND` adds a chunk to
/// it, `REMOVE` deletes the key. The in-memory state is only a key index pointing
/// at value extents inside the log; values are read from disk (or the pending
/// write buffer) on demand.
#[derive(Debug)]
pub struct PersistentMap<K, V> {
    log: RecordLog,
    entries: HashMap<K, Entry>,
    _marker: PhantomData<fn() -> V>,
}

impl<K: KeyCodec, V: ValueCodec> PersistentMap<K, V> {
    pub fn open(path: &Path, schema_version: u32, mode: OpenMode) -> Result<Self, StorageError> {
        let format = LogFormat {
            magic: MAP_MAGIC,
            schema_version,
        };
        let mut entries: HashMap<K, Entry> = HashMap::new();
        let log = RecordLog::open(path, format, mode, |record| {
            apply_record(&mut entries, &record)
        })?;

        Ok(Self {
            log,
            entries,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        match self.get_raw(key)? {
            Some(bytes) => V::decode_value(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the undecoded value bytes (all appended chunks concatenated).
    pub fn get_raw(&self, key: &K) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(entry.value_len());
        for extent in &entry.extents {
            self.log
                .read_append(extent.offset, extent.len as usize, &mut out)?;
        }
        Ok(Some(out))
    }

    /// Replaces the value stored under `key`.
    pub fn put(&mut self, key: K, value: &V) -> Result<(), StorageError> {
        let mut value_bytes = Vec::new();
        value.encode_value(&mut value_bytes);
        let extent = write_record(&mut self.log, RecordTag::Put, &key, &value_bytes)?;
        self.entries.insert(key, Entry::put(extent));
        Ok(())
    }

    /// Appends the bytes produced by `write` to the value under `key` without
    /// rewriting what is already stored. Nothing is written if `write` produces no
    /// bytes.
    pub fn append_with(
        &mut self,
        key: K,
        write: impl FnOnce(&mut Vec<u8>),
    ) -> Result<(), StorageError> {
        let mut chunk = Vec::new();
        write(&mut chunk);
        if chunk.is_empty() {
            return Ok(());
        }
        let extent = write_record(&mut self.log, RecordTag::Append, &key, &chunk)?;
        self.entries.entry(key).or_default().push_append(extent);
        Ok(())
    }

    /// Removes `key`; returns whether it was present.
    pub fn remove(&mut self, key: &K) -> Result<bool, StorageError> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        write_record(&mut self.log, RecordTag::Remove, key, &[])?;
        self.entries.remove(key);
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    pub fn force_flush(&mut self) -> Result<(), StorageError> {
        self.log.force_flush()
    }

    pub fn stats(&self) -> MapStats {
        MapStats {
            keys: self.entries.len(),
            log_bytes: self.log.len(),
            dirty: self.log.is_dirty(),
        }
    }

    /// Whether rewriting the log would reclaim a meaningful share of it.
    ///
    /// Only keys backed by a single record count as compact; superseded records
    /// and multi-chunk appended values count as reclaimable.
    pub fn needs_compaction(&self, policy: &CompactionPolicy) -> bool {
        if self.log.mode().is_read_only() {
            return false;
        }
        let total = self.log.len();
        if total < policy.min_bytes {
            return false;
        }
        let compact: u64 = self
            .entries
            .values()
            .filter(|entry| entry.extents.len() == 1)
            .map(|entry| entry.extents[0].record_len as u64)
            .sum();
        let body = total.saturating_sub(LOG_HEADER_LEN as u64).max(1);
        (compact as f64) / (body as f64) < policy.min_live_ratio
    }

    /// Rewrites the log so every key is stored as a single `PUT` record.
    ///
    /// Appended values are decoded and re-encoded, which drops everything the
    /// value codec does not carry forward (e.g. retracted members). Keys whose
    /// compacted value is empty are dropped.
    pub fn compact(&mut self) -> Result<CompactionReport, StorageError> {
        let before_bytes = self.log.len();
        let mut rewrite = self.log.begin_rewrite()?;
        let mut compacted: HashMap<K, Entry> = HashMap::with_capacity(self.entries.len());

        for (key, entry) in &self.entries {
            let mut raw = Vec::with_capacity(entry.value_len());
            for extent in &entry.extents {
                self.log
                    .read_append(extent.offset, extent.len as usize, &mut raw)?;
            }
            let value_bytes = if entry.appended {
                let mut encoded = Vec::with_capacity(raw.len());
                V::decode_value(&raw)?.encode_value(&mut encoded);
                encoded
            } else {
                raw
            };
            if value_bytes.is_empty() && entry.appended {
                continue;
            }

            let mut key_bytes = Vec::new();
            key.encode_key(&mut key_bytes);
            let payload_len = payload_len(&key_bytes, &value_bytes);
            let payload_offset = rewrite.append(RecordTag::Put, |buf| {
                encode_payload(buf, &key_bytes, &value_bytes)
            })?;
            compacted.insert(
                key.clone(),
                Entry::put(Extent {
                    offset: payload_offset + (payload_len - value_bytes.len()) as u64,
                    len: value_bytes.len() as u32,
                    record_len: record_len(payload_len) as u32,
                }),
            );
        }

        self.log.commit_rewrite(rewrite)?;
        self.entries = compacted;

        let report = CompactionReport {
            before_bytes,
            after_bytes: self.log.len(),
            keys: self.entries.len(),
        };
        tracing::debug!(
            target = "nova.storage",
            path = %self.log.path().display(),
            before_bytes = report.before_bytes,
            after_bytes = report.after_bytes,
            keys = report.keys,
            "compacted persistent map"
        );
        Ok(report)
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.log.close()
    }
}

fn payload_len(key: &[u8], value: &[u8]) -> usize {
    let mut prefix = Vec::with_capacity(2);
    encode_varint(key.len() as u64, &mut prefix);
    prefix.len() + key.len() + value.len()
}

fn encode_payload(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    encode_varint(key.len() as u64, buf);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

fn write_record<K: KeyCodec>(
    log: &mut RecordLog,
    tag: RecordTag,
    key: &K,
    value: &[u8],
) -> Result<Extent, StorageError> {
    let mut key_bytes = Vec::new();
    key.encode_key(&mut key_bytes);
    let payload_len = payload_len(&key_bytes, value);
    let payload_offset = log.append(tag, |buf| encode_payload(buf, &key_bytes, value))?;
    Ok(Extent {
        offset: payload_offset + (payload_len - value.len()) as u64,
        len: value.len() as u32,
        record_len: record_len(payload_len) as u32,
    })
}

fn apply_record<K: KeyCodec>(
    entries: &mut HashMap<K, Entry>,
    record: &RecordView<'_>,
) -> Result<(), StorageError> {
    let corrupt = |reason| StorageError::CorruptRecord {
        offset: record.payload_offset,
        reason,
    };

    let mut pos = 0usize;
    let key_len = decode_varint(record.payload, &mut pos).map_err(|_| corrupt("bad key length"))?;
    let key_end = usize::try_from(key_len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= record.payload.len())
        .ok_or_else(|| corrupt("key past end of record"))?;
    let key = K::decode_key(&record.payload[pos..key_end])?;
    let value_len = record.payload.len() - key_end;
    let extent = Extent {
        offset: record.payload_offset + key_end as u64,
        len: value_len as u32,
        record_len: record_len(record.payload.len()) as u32,
    };

    match record.tag {
        RecordTag::Put => {
            entries.insert(key, Entry::put(extent));
        }
        RecordTag::Append => {
            entries.entry(key).or_default().push_append(extent);
        }
        RecordTag::Remove => {
            if value_len != 0 {
                return Err(corrupt("remove record carries a value"));
            }
            entries.remove(&key);
        }
        RecordTag::Name => return Err(corrupt("unexpected record tag in map")),
    }
    Ok(())
}
