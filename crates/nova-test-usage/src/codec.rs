//! Value encodings stored in the index maps.
//!
//! ## Tombstone sets
//! A set of ids is an append log of zigzag LEB128 varints. A plain value adds an
//! id. [`REMOVED_MARKER`] followed by an id retracts it: the id is removed if it
//! is currently present, otherwise its negation is recorded as a placeholder.
//! Placeholders are never exposed as members; compaction drops them.
//!
//! ## Usage snapshots
//! Unsigned LEB128 varints: the class count, then per class (ascending) the
//! delta from the previous class id, the method count, and each method id as a
//! delta from the previous method id of that class. The first class and the
//! first method of each class are deltas from zero.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use nova_storage::{
    decode_signed_varint, decode_varint, decode_varint_u32, encode_signed_varint, encode_varint,
    StorageError, ValueCodec,
};

use crate::ids::{ClassId, MethodId, RawId};
use crate::snapshot::UsageSnapshot;

pub const REMOVED_MARKER: i64 = -1;

/// Replayed state of a tombstone-append id set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneSet<T> {
    /// Members and negative placeholders.
    entries: BTreeSet<i64>,
    _marker: PhantomData<T>,
}

impl<T> Default for TombstoneSet<T> {
    fn default() -> Self {
        Self {
            entries: BTreeSet::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: RawId> TombstoneSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays an encoded sequence of additions and retractions.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut set = Self::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let value = decode_signed_varint(bytes, &mut pos)?;
            if value == REMOVED_MARKER {
                if pos >= bytes.len() {
                    return Err(StorageError::Decode(
                        "removal marker at end of id set".to_string(),
                    ));
                }
                let id = decode_signed_varint(bytes, &mut pos)?;
                set.retract_raw(checked_id(id)?);
            } else {
                set.entries.insert(checked_id(value)?);
            }
        }
        Ok(set)
    }

    /// Appends a record that adds `id`.
    pub fn encode_add(id: T, out: &mut Vec<u8>) {
        encode_signed_varint(i64::from(id.to_raw()), out);
    }

    /// Appends a record that retracts `id`.
    pub fn encode_retract(id: T, out: &mut Vec<u8>) {
        encode_signed_varint(REMOVED_MARKER, out);
        encode_signed_varint(i64::from(id.to_raw()), out);
    }

    pub fn insert(&mut self, id: T) -> bool {
        self.entries.insert(i64::from(id.to_raw()))
    }

    pub fn retract(&mut self, id: T) {
        self.retract_raw(i64::from(id.to_raw()));
    }

    fn retract_raw(&mut self, id: i64) {
        if !self.entries.remove(&id) && id > 0 {
            self.entries.insert(-id);
        }
    }

    pub fn contains(&self, id: T) -> bool {
        self.entries.contains(&i64::from(id.to_raw()))
    }

    /// Current members, ascending. Placeholders are skipped.
    pub fn members(&self) -> impl Iterator<Item = T> + '_ {
        self.entries
            .range(0..)
            .filter_map(|&raw| u32::try_from(raw).ok().map(T::from_raw))
    }

    pub fn is_empty(&self) -> bool {
        self.members().next().is_none()
    }

    /// Number of negative placeholders carried by the replayed log.
    pub fn placeholder_count(&self) -> usize {
        self.entries.range(..0).count()
    }
}

/// Ids are `u32`s on the way in; anything else in a stored set is corruption.
fn checked_id(value: i64) -> Result<i64, StorageError> {
    if (0..=i64::from(u32::MAX)).contains(&value) {
        Ok(value)
    } else {
        Err(StorageError::Decode(format!("id {value} out of range in id set")))
    }
}

impl<T: RawId> FromIterator<T> for TombstoneSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl<T: RawId> ValueCodec for TombstoneSet<T> {
    /// Writes the members as plain additions; placeholders are dropped.
    fn encode_value(&self, out: &mut Vec<u8>) {
        for id in self.members() {
            Self::encode_add(id, out);
        }
    }

    fn decode_value(bytes: &[u8]) -> Result<Self, StorageError> {
        Self::decode(bytes)
    }
}

pub fn encode_snapshot(snapshot: &UsageSnapshot, out: &mut Vec<u8>) {
    encode_varint(snapshot.len() as u64, out);
    let mut prev_class = 0u32;
    for (&class, methods) in snapshot {
        encode_varint(u64::from(class.to_raw() - prev_class), out);
        prev_class = class.to_raw();

        encode_varint(methods.len() as u64, out);
        let mut prev_method = 0u32;
        for &method in methods {
            encode_varint(u64::from(method.to_raw() - prev_method), out);
            prev_method = method.to_raw();
        }
    }
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<UsageSnapshot, StorageError> {
    let mut pos = 0usize;
    let class_count = decode_varint(bytes, &mut pos)?;
    let mut snapshot = UsageSnapshot::new();

    let mut prev_class: Option<u32> = None;
    for _ in 0..class_count {
        let class = next_ascending(bytes, &mut pos, prev_class, "class")?;
        prev_class = Some(class);

        let method_count = decode_varint(bytes, &mut pos)?;
        let mut methods = Vec::new();
        let mut prev_method: Option<u32> = None;
        for _ in 0..method_count {
            let method = next_ascending(bytes, &mut pos, prev_method, "method")?;
            prev_method = Some(method);
            methods.push(MethodId::from_raw(method));
        }
        snapshot.extend_class(ClassId::from_raw(class), methods);
    }

    if pos != bytes.len() {
        return Err(StorageError::Decode(format!(
            "{} trailing bytes after usage snapshot",
            bytes.len() - pos
        )));
    }
    Ok(snapshot)
}

/// Decodes one delta and returns the absolute id; ids must strictly increase.
fn next_ascending(
    bytes: &[u8],
    pos: &mut usize,
    prev: Option<u32>,
    what: &str,
) -> Result<u32, StorageError> {
    let delta = decode_varint_u32(bytes, pos)?;
    match prev {
        None => Ok(delta),
        Some(_) if delta == 0 => Err(StorageError::Decode(format!(
            "duplicate {what} id in usage snapshot"
        ))),
        Some(prev) => prev
            .checked_add(delta)
            .ok_or_else(|| StorageError::Decode(format!("{what} id overflows u32"))),
    }
}

impl ValueCodec for UsageSnapshot {
    fn encode_value(&self, out: &mut Vec<u8>) {
        encode_snapshot(self, out);
    }

    fn decode_value(bytes: &[u8]) -> Result<Self, StorageError> {
        decode_snapshot(bytes)
    }
}
