//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Range scans merged across SSTables and a memtable overlay
//! - Create new SSTables from MemTable flushes
//! - Full compaction into a single SSTable

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StrataError};
use crate::keys::RawKeyValue;
use crate::memtable::{MemTable, MemTableEntry};

use super::{Lookup, SSTable, SSTableBuilder, SSTableReader};

/// An open SSTable and the id encoded in its file name
struct TableHandle {
    id: u64,
    reader: SSTableReader,
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock; readers share it, flush/compaction
///   take it exclusively only to swap the list
/// - `maintenance`: serializes flush and compaction so table ids stay in
///   data order
/// - `next_sstable_id`: Atomic counter (lock-free)
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<TableHandle>>,

    maintenance: Mutex<()>,

    /// Next ID for creating new SSTables
    next_sstable_id: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove temporary files left by an interrupted flush/compaction
    /// 3. Open readers for each SSTable (loads indexes into RAM)
    /// 4. Remove tables already replaced by a finished compaction
    /// 5. Order by ID descending (newest first)
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut sstable_ids: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }
            if file_path.extension().map_or(false, |ext| ext == "tmp") {
                tracing::warn!(path = %file_path.display(), "Removing incomplete SSTable");
                fs::remove_file(&file_path)?;
                continue;
            }
            if let Some(id) = Self::parse_sstable_id(&file_path) {
                sstable_ids.push(id);
            }
        }

        // Newest first (highest ID first)
        sstable_ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        for id in &sstable_ids {
            let reader = SSTableReader::open(&Self::sstable_path_with_dir(path, *id))?;
            sstables.push(TableHandle { id: *id, reader });
        }

        let superseded = sstables
            .iter()
            .map(|t| t.reader.compacted_through())
            .max()
            .unwrap_or(0);
        if superseded > 0 {
            let (live, stale): (Vec<_>, Vec<_>) =
                sstables.into_iter().partition(|t| t.id > superseded);
            sstables = live;
            for table in stale {
                tracing::warn!(
                    path = %table.reader.path().display(),
                    "Removing SSTable superseded by compaction"
                );
                let stale_path = table.reader.path().to_path_buf();
                drop(table);
                fs::remove_file(stale_path)?;
            }
        }

        // Next ID = max + 1, or 1 if no SSTables exist
        let next_id = sstable_ids.first().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            maintenance: Mutex::new(()),
            next_sstable_id: AtomicU64::new(next_id),
        })
    }

    /// Get a value by key (searches all SSTables newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key not found, or found tombstone (deleted)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sstables = self.sstables.read();

        for table in sstables.iter() {
            // Skip SSTable if key is outside its range (O(1) check)
            if !table.reader.might_contain(key) {
                continue;
            }

            match table.reader.get(key)? {
                Lookup::Value(value) => return Ok(Some(value)),
                Lookup::Tombstone => return Ok(None),
                Lookup::Absent => continue,
            }
        }

        Ok(None)
    }

    /// Scan `[start, end)` across every SSTable with `overlay` on top.
    ///
    /// `overlay` is evaluated while the table list is locked, so a
    /// concurrent flush cannot move entries between the overlay and the
    /// tables mid-scan. Newest version wins; tombstones hide older values.
    /// `max_rows == 0` means unbounded.
    ///
    /// Tables are merged lazily through their in-memory indexes and a value
    /// is read from disk only for the version that wins, so the work stops
    /// once `max_rows` rows are produced.
    pub fn scan<F>(&self, start: &[u8], end: &[u8], max_rows: usize, overlay: F) -> Result<Vec<RawKeyValue>>
    where
        F: FnOnce() -> BTreeMap<Vec<u8>, MemTableEntry>,
    {
        if start >= end {
            return Ok(Vec::new());
        }

        let sstables = self.sstables.read();
        let mut overlay = overlay().into_iter().peekable();
        // Newest first, so the first cursor positioned on a key owns it
        let mut cursors: Vec<_> = sstables
            .iter()
            .map(|t| (&t.reader, t.reader.index_range(start, end).peekable()))
            .collect();

        let mut rows = Vec::new();
        while max_rows == 0 || rows.len() < max_rows {
            let disk_min = cursors
                .iter_mut()
                .filter_map(|(_, cursor)| cursor.peek().map(|(k, _)| *k))
                .min();
            let key = match (overlay.peek().map(|(k, _)| k.as_slice()), disk_min) {
                (None, None) => break,
                (Some(mem), Some(disk)) => mem.min(disk).to_vec(),
                (Some(mem), None) => mem.to_vec(),
                (None, Some(disk)) => disk.to_vec(),
            };

            let mut winner: Option<Option<Vec<u8>>> = None;
            if overlay.peek().map_or(false, |(k, _)| *k == key) {
                if let Some((_, entry)) = overlay.next() {
                    winner = Some(match entry {
                        MemTableEntry::Value(v) => Some(v),
                        MemTableEntry::Tombstone => None,
                    });
                }
            }
            for (reader, cursor) in cursors.iter_mut() {
                if let Some(&(k, offset)) = cursor.peek() {
                    if k == key.as_slice() {
                        cursor.next();
                        if winner.is_none() {
                            winner = Some(reader.read_value_at(offset)?);
                        }
                    }
                }
            }

            if let Some(Some(value)) = winner {
                rows.push(RawKeyValue::new(key, value));
            }
        }

        Ok(rows)
    }

    /// Flush a MemTable to a new SSTable
    ///
    /// Creates a new SSTable file from the MemTable's sorted entries,
    /// opens a reader for it, and adds it to the front of the list.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(StrataError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let _maintenance = self.maintenance.lock();

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let tmp_path = self.tmp_path(id);

        let mut builder = SSTableBuilder::new(&tmp_path)?;
        for (key, entry) in memtable.iter() {
            match entry {
                MemTableEntry::Value(v) => builder.add(&key, &v)?,
                MemTableEntry::Tombstone => builder.add_tombstone(&key)?,
            }
        }
        let metadata = self.install(builder, id, &tmp_path)?;

        tracing::debug!(
            id,
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "Flushed memtable to SSTable"
        );
        Ok(metadata)
    }

    /// Merge every SSTable into one, dropping tombstones and shadowed values.
    ///
    /// Returns `Ok(None)` when there is nothing to compact.
    pub fn compact(&self) -> Result<Option<SSTable>> {
        let _maintenance = self.maintenance.lock();

        let (through, merged, input_count) = {
            let sstables = self.sstables.read();
            if sstables.len() < 2 {
                return Ok(None);
            }
            let through = sstables.iter().map(|t| t.id).max().unwrap_or(0);

            // Oldest first so newer entries overwrite older ones
            let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
            for table in sstables.iter().rev() {
                for entry in table.reader.iter()? {
                    let (key, value) = entry?;
                    merged.insert(key, value);
                }
            }
            (through, merged, sstables.len())
        };

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let tmp_path = self.tmp_path(id);
        let mut builder = SSTableBuilder::with_compacted_through(&tmp_path, through)?;
        for (key, value) in &merged {
            if let Some(value) = value {
                builder.add(key, value)?;
            }
        }
        let metadata = self.install(builder, id, &tmp_path)?;

        // Inputs are now shadowed by the new table; unlink them.
        let stale: Vec<TableHandle> = {
            let mut sstables = self.sstables.write();
            let (live, stale): (Vec<_>, Vec<_>) =
                sstables.drain(..).partition(|t| t.id > through);
            *sstables = live;
            stale
        };
        for table in stale {
            let path = table.reader.path().to_path_buf();
            drop(table);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove compacted SSTable");
            }
        }

        tracing::info!(
            inputs = input_count,
            output_id = id,
            entries = metadata.entry_count,
            "Compacted SSTables"
        );
        Ok(Some(metadata))
    }

    /// Finish `builder`, publish it under its final name and open it
    fn install(&self, builder: SSTableBuilder, id: u64, tmp_path: &Path) -> Result<SSTable> {
        let mut metadata = builder.finish()?;
        let path = self.sstable_path(id);
        fs::rename(tmp_path, &path)?;
        metadata.path = path.clone();

        let reader = SSTableReader::open(&path)?;
        let mut sstables = self.sstables.write();
        let pos = sstables.iter().position(|t| t.id < id).unwrap_or(sstables.len());
        sstables.insert(pos, TableHandle { id, reader });

        Ok(metadata)
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    fn tmp_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(format!("sstable_{:06}.sst.tmp", id))
    }

    /// Generate SSTable path given a directory and ID
    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// Parse SSTable ID from filename
    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("sstable_")?;
        id_str.parse().ok()
    }
}
