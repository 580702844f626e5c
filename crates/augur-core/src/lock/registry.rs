//! Per-key lock registry shared by both strategies.
//!
//! Entries are created on first touch. With `evict_idle` set, an entry is
//! removed as soon as the last lease on it is dropped, so the map only holds
//! keys that currently have a holder or a waiter. Without it the map grows
//! with every key ever seen.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::InstrumentKey;

pub(crate) struct KeyRegistry<L> {
    entries: Mutex<HashMap<InstrumentKey, Slot<L>>>,
    evict_idle: bool,
}

/// Map entry plus the number of live leases on it, both guarded by the map mutex.
struct Slot<L> {
    entry: Arc<L>,
    leases: usize,
}

impl<L: Default> KeyRegistry<L> {
    pub(crate) fn new(evict_idle: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            evict_idle,
        }
    }

    /// Lease the lock entry for `key`, creating it if needed.
    ///
    /// The lease does not lock anything by itself; it only pins the entry.
    pub(crate) fn checkout(&self, key: InstrumentKey) -> KeyLease<'_, L> {
        let entry = {
            let mut entries = self.entries.lock();
            let slot = entries.entry(key).or_insert_with(|| Slot {
                entry: Arc::new(L::default()),
                leases: 0,
            });
            slot.leases += 1;
            Arc::clone(&slot.entry)
        };
        KeyLease {
            registry: self,
            key,
            entry,
        }
    }
}

impl<L> KeyRegistry<L> {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn release(&self, key: InstrumentKey) {
        let mut entries = self.entries.lock();
        let Some(slot) = entries.get_mut(&key) else {
            return;
        };
        slot.leases = slot.leases.saturating_sub(1);
        if self.evict_idle && slot.leases == 0 {
            entries.remove(&key);
        }
    }
}

pub(crate) struct KeyLease<'a, L> {
    registry: &'a KeyRegistry<L>,
    key: InstrumentKey,
    entry: Arc<L>,
}

impl<L> KeyLease<'_, L> {
    pub(crate) fn lock_entry(&self) -> &L {
        &self.entry
    }
}

impl<L> Drop for KeyLease<'_, L> {
    fn drop(&mut self) {
        self.registry.release(self.key);
    }
}
