//! Ordered key-value and hash-map storage over a lock-free skip list.

use std::ops::Bound;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::error::StorageError;
use crate::storage::codec::{self, HSIZE, KV};

/// Storage engine.
///
/// Readers run lock-free from any thread. The server funnels every
/// mutation through its single writer thread, which makes the
/// read-modify-write operations (`incr`, `setnx`, hash size upkeep)
/// atomic without any locking here.
pub struct Store {
    map: SkipMap<Bytes, Bytes>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    /// Total number of raw rows, size rows included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // ── key-value ────────────────────────────────────────────────────────

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let raw = codec::encode_kv_key(key);
        self.map.get(&raw).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: &[u8], val: Bytes) -> Result<(), StorageError> {
        codec::check_key(key)?;
        self.map.insert(codec::encode_kv_key(key), val);
        Ok(())
    }

    /// Store only when absent. Returns true when the value was written.
    pub fn setnx(&self, key: &[u8], val: Bytes) -> Result<bool, StorageError> {
        codec::check_key(key)?;
        let raw = codec::encode_kv_key(key);
        if self.map.contains_key(&raw) {
            return Ok(false);
        }
        self.map.insert(raw, val);
        Ok(true)
    }

    /// Returns true when the key existed.
    pub fn del(&self, key: &[u8]) -> bool {
        let raw = codec::encode_kv_key(key);
        self.map.remove(&raw).is_some()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let raw = codec::encode_kv_key(key);
        self.map.contains_key(&raw)
    }

    /// Add `by` to the decimal value stored at `key`, missing counts as 0.
    pub fn incr(&self, key: &[u8], by: i64) -> Result<i64, StorageError> {
        codec::check_key(key)?;
        let raw = codec::encode_kv_key(key);
        let old = match self.map.get(&raw) {
            Some(entry) => parse_i64(entry.value())?,
            None => 0,
        };
        let new = old.checked_add(by).ok_or(StorageError::Overflow)?;
        self.map.insert(raw, Bytes::from(new.to_string()));
        Ok(new)
    }

    /// Keys after `start` (exclusive) up to `end` (inclusive, empty for
    /// unbounded), at most `limit` pairs. Order follows the encoded
    /// placement: slot first, then key bytes.
    pub fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> Vec<(Bytes, Bytes)> {
        let (floor, ceil) = codec::section_bounds(KV);
        let lower = if start.is_empty() {
            Bound::Included(floor)
        } else {
            Bound::Excluded(codec::encode_kv_key(start))
        };
        let upper = if end.is_empty() {
            Bound::Excluded(ceil)
        } else {
            Bound::Included(codec::encode_kv_key(end))
        };
        self.collect_kv(self.map.range((lower, upper)), limit)
    }

    /// Like [`scan`](Self::scan) but walking down from `start`.
    pub fn rscan(&self, start: &[u8], end: &[u8], limit: usize) -> Vec<(Bytes, Bytes)> {
        let (floor, ceil) = codec::section_bounds(KV);
        let lower = if end.is_empty() {
            Bound::Included(floor)
        } else {
            Bound::Included(codec::encode_kv_key(end))
        };
        let upper = if start.is_empty() {
            Bound::Excluded(ceil)
        } else {
            Bound::Excluded(codec::encode_kv_key(start))
        };
        self.collect_kv(self.map.range((lower, upper)).rev(), limit)
    }

    fn collect_kv<'a, I>(&self, entries: I, limit: usize) -> Vec<(Bytes, Bytes)>
    where
        I: Iterator<Item = crossbeam_skiplist::map::Entry<'a, Bytes, Bytes>>,
    {
        let mut out = Vec::new();
        for entry in entries {
            if out.len() >= limit {
                break;
            }
            // strip marker and slot
            out.push((entry.key().slice(3..), entry.value().clone()));
        }
        out
    }

    // ── hash maps ────────────────────────────────────────────────────────

    pub fn hget(&self, name: &[u8], field: &[u8]) -> Option<Bytes> {
        let raw = codec::encode_hash_key(name, field);
        self.map.get(&raw).map(|entry| entry.value().clone())
    }

    /// Returns true when the field was created rather than replaced.
    pub fn hset(&self, name: &[u8], field: &[u8], val: Bytes) -> Result<bool, StorageError> {
        codec::check_key(name)?;
        codec::check_key(field)?;
        let raw = codec::encode_hash_key(name, field);
        let created = !self.map.contains_key(&raw);
        self.map.insert(raw, val);
        if created {
            self.adjust_hsize(name, 1)?;
        }
        Ok(created)
    }

    /// Returns true when the field existed.
    pub fn hdel(&self, name: &[u8], field: &[u8]) -> Result<bool, StorageError> {
        let raw = codec::encode_hash_key(name, field);
        if self.map.remove(&raw).is_none() {
            return Ok(false);
        }
        self.adjust_hsize(name, -1)?;
        Ok(true)
    }

    /// Add `by` to the decimal value of one field, missing counts as 0.
    pub fn hincr(&self, name: &[u8], field: &[u8], by: i64) -> Result<i64, StorageError> {
        codec::check_key(name)?;
        codec::check_key(field)?;
        let raw = codec::encode_hash_key(name, field);
        let existing = self.map.get(&raw).map(|entry| entry.value().clone());
        let old = match &existing {
            Some(val) => parse_i64(val)?,
            None => 0,
        };
        let new = old.checked_add(by).ok_or(StorageError::Overflow)?;
        self.map.insert(raw, Bytes::from(new.to_string()));
        if existing.is_none() {
            self.adjust_hsize(name, 1)?;
        }
        Ok(new)
    }

    /// Number of fields in a map, 0 when absent.
    pub fn hsize(&self, name: &[u8]) -> i64 {
        let raw = codec::encode_hsize_key(name);
        match self.map.get(&raw) {
            Some(entry) => parse_i64(entry.value()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn hgetall(&self, name: &[u8]) -> Vec<(Bytes, Bytes)> {
        self.hscan(name, b"", b"", usize::MAX)
    }

    /// Fields after `start` (exclusive) up to `end` (inclusive, empty for
    /// unbounded), at most `limit` pairs, in field byte order.
    pub fn hscan(&self, name: &[u8], start: &[u8], end: &[u8], limit: usize) -> Vec<(Bytes, Bytes)> {
        let prefix = codec::hash_field_prefix(name);
        let field_at = prefix.len();
        let lower = if start.is_empty() {
            Bound::Included(prefix.clone())
        } else {
            Bound::Excluded(codec::encode_hash_key(name, start))
        };
        let upper = if end.is_empty() {
            Bound::Excluded(prefix_upper(&prefix))
        } else {
            Bound::Included(codec::encode_hash_key(name, end))
        };
        let mut out = Vec::new();
        for entry in self.map.range((lower, upper)) {
            if out.len() >= limit {
                break;
            }
            out.push((entry.key().slice(field_at..), entry.value().clone()));
        }
        out
    }

    /// Drop every field of a map and its size row. Returns fields removed.
    pub fn hclear(&self, name: &[u8]) -> u64 {
        let prefix = codec::hash_field_prefix(name);
        let upper = prefix_upper(&prefix);
        let mut removed = 0u64;
        loop {
            let batch: Vec<Bytes> = self
                .map
                .range((Bound::Included(prefix.clone()), Bound::Excluded(upper.clone())))
                .take(1024)
                .map(|entry| entry.key().clone())
                .collect();
            if batch.is_empty() {
                break;
            }
            for raw in batch {
                if self.map.remove(&raw).is_some() {
                    removed += 1;
                }
            }
        }
        self.map.remove(&codec::encode_hsize_key(name));
        removed
    }

    fn adjust_hsize(&self, name: &[u8], by: i64) -> Result<(), StorageError> {
        let raw = codec::encode_hsize_key(name);
        let old = match self.map.get(&raw) {
            Some(entry) => parse_i64(entry.value())?,
            None => 0,
        };
        let new = old + by;
        if new <= 0 {
            self.map.remove(&raw);
        } else {
            self.map.insert(raw, Bytes::from(new.to_string()));
        }
        Ok(())
    }

    // ── slot placement ───────────────────────────────────────────────────

    /// First kv key of one slot.
    pub fn kv_first_in_slot(&self, slot: u16) -> Option<Bytes> {
        let (lower, upper) = codec::slot_bounds(KV, slot);
        self.map
            .range((Bound::Included(lower), Bound::Excluded(upper)))
            .next()
            .map(|entry| entry.key().slice(3..))
    }

    /// Last kv key of one slot.
    pub fn kv_last_in_slot(&self, slot: u16) -> Option<Bytes> {
        let (lower, upper) = codec::slot_bounds(KV, slot);
        self.map
            .range((Bound::Included(lower), Bound::Excluded(upper)))
            .next_back()
            .map(|entry| entry.key().slice(3..))
    }

    /// Decoded kv keys of one slot, up to `limit`.
    pub fn kv_keys_in_slot(&self, slot: u16, limit: usize) -> Vec<Bytes> {
        self.slot_keys(KV, slot, limit, false)
    }

    /// Hash-map names of one slot, up to `limit`, in name order.
    pub fn hash_names_in_slot(&self, slot: u16, limit: usize) -> Vec<Bytes> {
        self.slot_keys(HSIZE, slot, limit, false)
    }

    /// Hash-map names of one slot walked from the top.
    pub fn hash_names_in_slot_rev(&self, slot: u16, limit: usize) -> Vec<Bytes> {
        self.slot_keys(HSIZE, slot, limit, true)
    }

    fn slot_keys(&self, marker: u8, slot: u16, limit: usize, rev: bool) -> Vec<Bytes> {
        let (lower, upper) = codec::slot_bounds(marker, slot);
        let range = self.map.range((Bound::Included(lower), Bound::Excluded(upper)));
        let decode = |entry: crossbeam_skiplist::map::Entry<'_, Bytes, Bytes>| entry.key().slice(3..);
        if rev {
            range.rev().take(limit).map(decode).collect()
        } else {
            range.take(limit).map(decode).collect()
        }
    }

}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("rows", &self.len()).finish()
    }
}

fn parse_i64(raw: &[u8]) -> Result<i64, StorageError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(StorageError::NotInteger)
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_upper(prefix: &Bytes) -> Bytes {
    let mut buf = prefix.to_vec();
    while let Some(last) = buf.last_mut() {
        if *last == 0xFF {
            buf.pop();
        } else {
            *last += 1;
            break;
        }
    }
    Bytes::from(buf)
}
