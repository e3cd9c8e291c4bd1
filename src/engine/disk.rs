//! Durable engine
//!
//! Coordinates the WAL, MemTable and StorageManager under one data
//! directory.
//!
//! ## Write path
//! 1. Acquire the write lock (one batch at a time)
//! 2. Stage the batch against memtable + SSTables
//! 3. Append one WAL record holding the resolved writes
//! 4. Apply the writes to the memtable under a single write lock
//! 5. Flush and compact when thresholds are crossed
//!
//! ## Read path
//! MemTable first (a tombstone means absent), then SSTables newest → oldest.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::Engine;
use crate::batch::{self, BatchOp};
use crate::config::{Attributes, Config};
use crate::error::{Result, StrataError};
use crate::keys::{validate_key, RawKeyValue};
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{SSTable, StorageManager};
use crate::wal::{Operation, WalRecovery, WalWriter};

const WAL_FILENAME: &str = "wal.log";
const SSTABLE_DIR: &str = "sstables";

/// Canonical data directories owned by a started engine in this process
static OPEN_DIRS: Mutex<BTreeSet<PathBuf>> = parking_lot::const_mutex(BTreeSet::new());

/// Exclusive claim on a data directory; released on drop
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = fs::canonicalize(dir)?;
        let mut open = OPEN_DIRS.lock();
        if !open.insert(path.clone()) {
            return Err(StrataError::Lifecycle(format!(
                "data directory {} is in use by another engine",
                path.display()
            )));
        }
        Ok(Self { path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        OPEN_DIRS.lock().remove(&self.path);
    }
}

/// Durable engine backed by a WAL and SSTables
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (batches, flush, compaction): serialized by `write_lock`
///   inside the running store
/// - **Reads** (get/scan): no write lock; the memtable and SSTable list have
///   their own RwLocks
/// - **Lifecycle** (start/close): exclusive on `store`, so close waits for
///   in-flight operations
pub struct DiskEngine {
    config: Config,
    /// `Some` while started
    store: RwLock<Option<Store>>,
}

/// Everything that exists only while the engine is started
struct Store {
    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Persistent storage manager (internal RwLock on sstables vec)
    storage: StorageManager,

    /// Serializes batches, flush and compaction
    write_lock: Mutex<()>,

    _dir_lock: DirLock,
}

impl DiskEngine {
    /// Create a stopped engine; call `start()` before use
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: RwLock::new(None),
        }
    }

    /// Create and start an engine
    pub fn open(config: Config) -> Result<Self> {
        let engine = Self::new(config);
        engine.start()?;
        Ok(engine)
    }

    /// Remove the data directory and everything in it
    ///
    /// Only allowed while the engine is stopped. A missing directory is not
    /// an error.
    pub fn destroy(&self) -> Result<()> {
        if self.is_started() {
            return Err(StrataError::Lifecycle(
                "cannot destroy a started engine".to_string(),
            ));
        }

        let dir = &self.config.data_dir;
        if !dir.exists() {
            return Ok(());
        }

        // Refuse to pull the directory out from under another engine
        let _claim = DirLock::acquire(dir)?;
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(path = %dir.display(), "Destroyed data directory");
        Ok(())
    }

    /// Flush the memtable to a new SSTable and truncate the WAL
    pub fn flush(&self) -> Result<()> {
        let guard = self.store.read();
        let store = started(&guard)?;
        let _writer = store.write_lock.lock();
        store.flush_locked()
    }

    /// Merge every SSTable into one. `Ok(None)` if there was nothing to do.
    pub fn compact(&self) -> Result<Option<SSTable>> {
        let guard = self.store.read();
        let store = started(&guard)?;
        let _writer = store.write_lock.lock();
        store.storage.compact()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn is_started(&self) -> bool {
        self.store.read().is_some()
    }

    /// Get the current memtable size (0 while stopped)
    pub fn memtable_size(&self) -> usize {
        self.store.read().as_ref().map_or(0, |s| s.memtable.size())
    }

    /// Get the memtable entry count (0 while stopped)
    pub fn memtable_entry_count(&self) -> usize {
        self.store
            .read()
            .as_ref()
            .map_or(0, |s| s.memtable.entry_count())
    }

    /// Get the number of SSTables (0 while stopped)
    pub fn sstable_count(&self) -> usize {
        self.store
            .read()
            .as_ref()
            .map_or(0, |s| s.storage.sstable_count())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Engine for DiskEngine {
    fn start(&self) -> Result<()> {
        let mut slot = self.store.write();
        if slot.is_some() {
            return Err(StrataError::Lifecycle(format!(
                "engine at {} is already started",
                self.config.data_dir.display()
            )));
        }

        *slot = Some(Store::open(&self.config)?);
        tracing::info!(path = %self.config.data_dir.display(), "Engine started");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let store = match self.store.write().take() {
            Some(store) => store,
            None => return Ok(()),
        };

        store.close()?;
        tracing::info!(path = %self.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    fn attrs(&self) -> &Attributes {
        &self.config.attrs
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let guard = self.store.read();
        started(&guard)?.read(key)
    }

    fn scan(&self, start: &[u8], end: &[u8], max_rows: usize) -> Result<Vec<RawKeyValue>> {
        let guard = self.store.read();
        let store = started(&guard)?;
        store
            .storage
            .scan(start, end, max_rows, || store.memtable.range_limited(start, end, max_rows))
    }

    fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let guard = self.store.read();
        started(&guard)?.write_batch(ops, &self.config)
    }
}

fn started<'a>(guard: &'a RwLockReadGuard<'_, Option<Store>>) -> Result<&'a Store> {
    guard
        .as_ref()
        .ok_or_else(|| StrataError::Lifecycle("engine is not started".to_string()))
}

impl Store {
    /// Open the on-disk state under `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate config and create directories
    /// 2. Claim the directory for this engine
    /// 3. Load existing SSTables
    /// 4. Replay the WAL, flush what it held and truncate it
    fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir_lock = DirLock::acquire(&config.data_dir)?;

        let storage_dir = config.data_dir.join(SSTABLE_DIR);
        let wal_path = config.data_dir.join(WAL_FILENAME);

        let storage = StorageManager::open(&storage_dir)?;
        let memtable = MemTable::new();

        let mut recovered = 0;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            for entry in entries {
                for op in entry.operations {
                    match op {
                        Operation::Put { key, value } => {
                            memtable.put(key, value);
                        }
                        Operation::Delete { key } => {
                            memtable.delete(key);
                        }
                    }
                }
            }
            if result.entries_recovered > 0 || result.entries_corrupted > 0 {
                tracing::info!(
                    recovered = result.entries_recovered,
                    corrupted = result.entries_corrupted,
                    last_lsn = result.last_lsn,
                    "WAL recovery complete"
                );
            }
            recovered = result.entries_recovered;
        }

        // Recovered writes become durable in an SSTable before the log is
        // dropped.
        if !memtable.is_empty() {
            tracing::info!(entries = memtable.entry_count(), "Flushing recovered entries");
            storage.flush(&memtable)?;
            memtable.clear();
        }

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        if recovered > 0 {
            wal.truncate()?;
        }

        Ok(Self {
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
            _dir_lock: dir_lock,
        })
    }

    /// Committed value of a key
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.memtable.get(key) {
            Some(MemTableEntry::Value(value)) => Ok(Some(value)),
            Some(MemTableEntry::Tombstone) => Ok(None),
            None => self.storage.get(key),
        }
    }

    fn write_batch(&self, ops: &[BatchOp], config: &Config) -> Result<()> {
        let _writer = self.write_lock.lock();

        let staged = batch::stage(ops, |key| self.read(key))?;
        if staged.is_empty() {
            return Ok(());
        }

        let lsn = self.wal.lock().append_batch(Operation::from_staged(&staged))?;
        let size = self.memtable.apply(&staged);
        tracing::debug!(lsn, ops = ops.len(), keys = staged.len(), "Committed batch");

        // The batch is durable at this point; maintenance failures must not
        // turn it into an error.
        if size >= config.memtable_size_limit {
            if let Err(e) = self.flush_locked() {
                tracing::warn!(error = %e, "Memtable flush failed");
                return Ok(());
            }
        }
        if self.storage.sstable_count() > config.max_sstables {
            if let Err(e) = self.storage.compact() {
                tracing::warn!(error = %e, "Compaction failed");
            }
        }

        Ok(())
    }

    /// Flush with `write_lock` held
    fn flush_locked(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.storage.flush(&self.memtable)?;
        self.memtable.clear();

        // Entries are now durable in the SSTable
        self.wal.lock().truncate()?;
        Ok(())
    }

    /// Owned, so no batch can be in flight
    fn close(self) -> Result<()> {
        self.flush_locked()?;
        self.wal.lock().sync()?;
        Ok(())
    }
}
