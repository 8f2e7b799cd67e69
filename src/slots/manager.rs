//! Slot bookkeeping and migration.
//!
//! Migration status lives in a reserved hash map named `SLOTS_HASH`, one
//! field per slot holding `1` (normal) or `2` (migrating), so cluster
//! tooling can inspect it over the ordinary hash commands. The map itself
//! is never shipped to a peer and never counts as slot data.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::storage::Store;

const META_HASH: &[u8] = b"SLOTS_HASH";

/// Rows transferred per listing round while draining a slot.
const MIGRATE_BATCH: usize = 128;

/// Where one slot stands in the resharding lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// No rows and no migration marker.
    Empty,
    /// Holds data, not being moved.
    Normal,
    /// Marked for transfer. With migrations running synchronously this
    /// only survives a transfer that failed partway; the next attempt
    /// resumes it.
    Migrating,
}

/// First and last key per row family of one slot. Empty fields mean the
/// family has no rows there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotKeyRange {
    pub kv_begin: Bytes,
    pub kv_end: Bytes,
    pub hash_begin: Bytes,
    pub hash_end: Bytes,
}

impl SlotKeyRange {
    pub fn kv_empty(&self) -> bool {
        self.kv_begin.is_empty() && self.kv_end.is_empty()
    }

    pub fn hash_empty(&self) -> bool {
        self.hash_begin.is_empty() && self.hash_end.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.kv_empty() && self.hash_empty()
    }
}

/// Discovers per-slot key ranges and moves whole slots (or single keys)
/// to another server over the client protocol.
pub struct SlotsManager {
    store: Arc<Store>,
    // serializes migrations regardless of which thread runs them
    migrate_serial: Mutex<()>,
}

impl SlotsManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            migrate_serial: Mutex::new(()),
        }
    }

    /// Range of one slot, meta map excluded.
    pub fn load_slot_range(&self, slot: u16) -> SlotKeyRange {
        let kv_begin = self.store.kv_first_in_slot(slot).unwrap_or_default();
        let kv_end = self.store.kv_last_in_slot(slot).unwrap_or_default();
        // at most one meta name can appear, so two candidates suffice
        let hash_begin = first_data_name(self.store.hash_names_in_slot(slot, 2));
        let hash_end = first_data_name(self.store.hash_names_in_slot_rev(slot, 2));
        SlotKeyRange {
            kv_begin,
            kv_end,
            hash_begin,
            hash_end,
        }
    }

    /// Non-empty slots in `[start, start + count)`, with their ranges.
    pub fn slots_info(&self, start: u16, count: Option<u16>) -> Vec<(u16, SlotKeyRange)> {
        let end = match count {
            Some(c) => start.saturating_add(c).min(super::SLOT_COUNT),
            None => super::SLOT_COUNT,
        };
        (start..end)
            .filter_map(|slot| {
                let range = self.load_slot_range(slot);
                if range.is_empty() {
                    None
                } else {
                    Some((slot, range))
                }
            })
            .collect()
    }

    pub fn slot_status(&self, slot: u16) -> Result<SlotStatus> {
        match self.store.hget(META_HASH, &slot_field(slot)) {
            Some(raw) => match raw.as_ref() {
                b"1" => Ok(SlotStatus::Normal),
                b"2" => Ok(SlotStatus::Migrating),
                other => Err(Error::Internal(format!(
                    "slot {slot} has unrecognized status {:?}",
                    String::from_utf8_lossy(other)
                ))),
            },
            None if self.load_slot_range(slot).is_empty() => Ok(SlotStatus::Empty),
            None => Ok(SlotStatus::Normal),
        }
    }

    /// Move every row of `slot` to `dst`, deleting locally as rows land.
    /// Returns kv rows plus hash maps moved. The slot is marked migrating
    /// for the duration; a failure leaves the marker so a repeat call
    /// picks the transfer back up.
    pub fn migrate_slot(
        &self,
        dst: SocketAddr,
        timeout: Duration,
        slot: u16,
        auth: Option<&str>,
    ) -> Result<u64> {
        let _serial = self.migrate_serial.lock();
        self.store
            .hset(META_HASH, &slot_field(slot), Bytes::from_static(b"2"))?;
        info!(slot, %dst, "slot migration starting");

        let mut client = self.connect(dst, timeout, auth)?;
        let mut moved = 0u64;

        loop {
            let keys = self.store.kv_keys_in_slot(slot, MIGRATE_BATCH);
            if keys.is_empty() {
                break;
            }
            for key in keys {
                if let Some(val) = self.store.get(&key) {
                    client.set(&key, &val)?;
                    self.store.del(&key);
                    moved += 1;
                }
            }
        }

        loop {
            let names: Vec<Bytes> = self
                .store
                .hash_names_in_slot(slot, MIGRATE_BATCH)
                .into_iter()
                .filter(|name| name.as_ref() != META_HASH)
                .collect();
            if names.is_empty() {
                break;
            }
            for name in names {
                moved += self.transfer_hash(&mut client, &name)?;
            }
        }

        self.store.hdel(META_HASH, &slot_field(slot))?;
        info!(slot, moved, "slot migration finished");
        Ok(moved)
    }

    /// Move the kv row and hash map stored under `key`, if either exists.
    /// Returns rows moved.
    pub fn migrate_key(
        &self,
        dst: SocketAddr,
        timeout: Duration,
        key: &[u8],
        auth: Option<&str>,
    ) -> Result<u64> {
        let _serial = self.migrate_serial.lock();
        debug!(key = %String::from_utf8_lossy(key), %dst, "single-key migration");

        let kv_val = self.store.get(key);
        let has_hash = key != META_HASH && self.store.hsize(key) > 0;
        if kv_val.is_none() && !has_hash {
            return Ok(0);
        }

        let mut client = self.connect(dst, timeout, auth)?;
        let mut moved = 0u64;
        if let Some(val) = kv_val {
            client.set(key, &val)?;
            self.store.del(key);
            moved += 1;
        }
        if has_hash {
            moved += self.transfer_hash(&mut client, &Bytes::copy_from_slice(key))?;
        }
        Ok(moved)
    }

    /// Drop every migration marker. Returns true when any existed.
    pub fn clear_statuses(&self) -> bool {
        let cleared = self.store.hclear(META_HASH);
        if cleared > 0 {
            warn!(cleared, "migration statuses dropped");
        }
        cleared > 0
    }

    fn connect(&self, dst: SocketAddr, timeout: Duration, auth: Option<&str>) -> Result<Client> {
        let mut client = Client::connect(dst, timeout)?;
        if let Some(password) = auth {
            client.auth(password)?;
        }
        Ok(client)
    }

    /// Replays one hash map onto the peer, then clears it locally.
    fn transfer_hash(&self, client: &mut Client, name: &Bytes) -> Result<u64> {
        let fields = self.store.hgetall(name);
        for (field, val) in &fields {
            client.hset(name, field, val)?;
        }
        self.store.hclear(name);
        Ok(1)
    }
}

impl std::fmt::Debug for SlotsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotsManager").finish_non_exhaustive()
    }
}

fn slot_field(slot: u16) -> Bytes {
    let mut buf = itoa::Buffer::new();
    Bytes::copy_from_slice(buf.format(slot).as_bytes())
}

fn first_data_name(names: Vec<Bytes>) -> Bytes {
    names
        .into_iter()
        .find(|name| name.as_ref() != META_HASH)
        .unwrap_or_default()
}
