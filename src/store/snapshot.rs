//! In-memory view of the log
//!
//! Holds the latest committed value per key. Only the consumption callback
//! writes to it; `get` reads it from inside the read-to-end barrier callback,
//! so the lock is what carries the barrier's happens-before edge to readers.

use crate::log::LogRecord;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Counters describing what the snapshot has absorbed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Live keys (tombstoned keys excluded)
    pub keys: usize,
    /// Records applied since the store was configured
    pub applied: u64,
    /// Highest offset applied, per partition
    pub positions: HashMap<u32, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<Option<Bytes>, Bytes>,
    applied: u64,
    positions: HashMap<u32, u64>,
}

/// Key → latest value map rebuilt from the log
#[derive(Debug, Default)]
pub struct Snapshot {
    inner: RwLock<Inner>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delivered record. A tombstone removes the key.
    pub fn apply(&self, record: LogRecord) {
        let mut inner = self.inner.write();
        match record.value {
            Some(value) => {
                inner.data.insert(record.key, value);
            }
            None => {
                inner.data.remove(&record.key);
            }
        }
        inner.applied += 1;
        let position = inner.positions.entry(record.partition).or_insert(record.offset);
        *position = (*position).max(record.offset);
    }

    /// Current value of each requested key; absent keys map to `None`
    pub fn lookup<'a, I>(&self, keys: I) -> HashMap<Option<Bytes>, Option<Bytes>>
    where
        I: IntoIterator<Item = &'a Option<Bytes>>,
    {
        let inner = self.inner.read();
        keys.into_iter()
            .map(|key| (key.clone(), inner.data.get(key).cloned()))
            .collect()
    }

    pub fn stats(&self) -> SnapshotStats {
        let inner = self.inner.read();
        SnapshotStats {
            keys: inner.data.len(),
            applied: inner.applied,
            positions: inner.positions.clone(),
        }
    }
}
