//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::MemTableEntry;
use crate::batch::StagedWrites;

/// In-memory table for recent writes
///
/// `size` and `entry_count` are only modified while the map's write lock is
/// held, so they always describe a state some reader could have observed.
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,
    /// Approximate size in bytes (keys + values)
    size: AtomicUsize,
    entry_count: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
        }
    }

    /// Get the entry for a key (read lock)
    ///
    /// `None` means the memtable knows nothing about the key; older SSTables
    /// must be consulted.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair, returning the new approximate size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, MemTableEntry::Value(value));
        self.size.load(Ordering::SeqCst)
    }

    /// Delete a key (inserts tombstone), returning the new approximate size
    pub fn delete(&self, key: Vec<u8>) -> usize {
        let mut data = self.data.write();
        self.insert_locked(&mut data, key, MemTableEntry::Tombstone);
        self.size.load(Ordering::SeqCst)
    }

    /// Apply every staged write under a single write lock
    pub fn apply(&self, writes: &StagedWrites) -> usize {
        let mut data = self.data.write();
        for (key, value) in writes.iter() {
            let entry = match value {
                Some(v) => MemTableEntry::Value(v.to_vec()),
                None => MemTableEntry::Tombstone,
            };
            self.insert_locked(&mut data, key.to_vec(), entry);
        }
        self.size.load(Ordering::SeqCst)
    }

    fn insert_locked(
        &self,
        data: &mut BTreeMap<Vec<u8>, MemTableEntry>,
        key: Vec<u8>,
        entry: MemTableEntry,
    ) {
        let key_len = key.len();
        let payload_len = entry.payload_len();
        match data.insert(key, entry) {
            Some(old) => {
                // Key bytes already counted; only the payload changes.
                self.size.fetch_sub(old.payload_len(), Ordering::SeqCst);
                self.size.fetch_add(payload_len, Ordering::SeqCst);
            }
            None => {
                self.size.fetch_add(key_len + payload_len, Ordering::SeqCst);
                self.entry_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Snapshot of the entries with keys in `[start, end)`, tombstones included
    pub fn range(&self, start: &[u8], end: &[u8]) -> BTreeMap<Vec<u8>, MemTableEntry> {
        self.range_limited(start, end, 0)
    }

    /// Like `range`, but stops after `max_values` live values (0 = no limit).
    ///
    /// Values here are the newest version of their key, so a scan returning
    /// at most `max_values` rows never needs a key past the cut.
    pub fn range_limited(
        &self,
        start: &[u8],
        end: &[u8],
        max_values: usize,
    ) -> BTreeMap<Vec<u8>, MemTableEntry> {
        let mut snapshot = BTreeMap::new();
        if start >= end {
            return snapshot;
        }

        let data = self.data.read();
        let mut values = 0;
        for (key, entry) in data.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end))) {
            if max_values > 0 && values == max_values {
                break;
            }
            if let MemTableEntry::Value(_) = entry {
                values += 1;
            }
            snapshot.insert(key.clone(), entry.clone());
        }
        snapshot
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Get an iterator over all entries (for flush)
    /// Returns entries in sorted key order from a point-in-time snapshot
    pub fn iter(&self) -> MemTableIterator {
        let snapshot: Vec<(Vec<u8>, MemTableEntry)> = self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        MemTableIterator {
            inner: snapshot.into_iter(),
        }
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::SeqCst);
        self.entry_count.store(0, Ordering::SeqCst);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over MemTable entries
pub struct MemTableIterator {
    inner: std::vec::IntoIter<(Vec<u8>, MemTableEntry)>,
}

impl Iterator for MemTableIterator {
    type Item = (Vec<u8>, MemTableEntry);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
