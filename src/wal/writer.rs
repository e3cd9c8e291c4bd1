//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Operation, WalEntry, WalRecovery};
use crate::config::WalSyncStrategy;
use crate::error::{Result, StrataError};

/// Writes entries to the WAL file
///
/// Each record is written with a single unbuffered `write_all`. A failed
/// append is rolled back to the previous record boundary, so the log only
/// ever holds records whose append returned `Ok`.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last successful append
    len: u64,
    /// LSN the next append will receive
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
    /// Set when a rollback failed; the tail of the file is unknown
    poisoned: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing log is appended to and its LSN sequence continues. Callers
    /// that may be opening a crashed log should run `WalRecovery::recover`
    /// first so the tail is clean.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let last_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn
        } else {
            0
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            next_lsn: last_lsn + 1,
            sync_strategy,
            unsynced: 0,
            poisoned: false,
        })
    }

    /// Append a single operation as its own entry
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        self.append_batch(vec![operation])
    }

    /// Append one entry holding every operation of a batch
    ///
    /// The record reaches the OS before this returns; fsync follows the sync
    /// strategy. Returns the entry's LSN. On error nothing of the record
    /// remains in the log and the LSN is not consumed.
    pub fn append_batch(&mut self, operations: Vec<Operation>) -> Result<u64> {
        self.check_poisoned()?;

        let lsn = self.next_lsn;
        let bytes = WalEntry::new(lsn, operations).serialize()?;

        if let Err(e) = self.write_record(&bytes) {
            self.rollback();
            return Err(e);
        }

        self.len += bytes.len() as u64;
        self.next_lsn += 1;
        Ok(lsn)
    }

    fn write_record(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;

        let sync_now = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };
        if sync_now {
            self.file.sync_data()?;
            self.unsynced = 0;
        } else {
            self.unsynced += 1;
        }
        Ok(())
    }

    /// Cut the file back to the last good record boundary
    fn rollback(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|_| self.file.sync_all());
        if let Err(e) = restored {
            tracing::error!(
                path = %self.path.display(),
                len = self.len,
                error = %e,
                "Failed to roll back WAL append; refusing further writes"
            );
            self.poisoned = true;
        }
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(StrataError::Storage(format!(
                "WAL {} has an unknown tail after a failed append; restart the engine",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.check_poisoned()?;
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry (their writes are durable in SSTables). LSNs keep
    /// increasing.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.unsynced = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Get the LSN the next append will use
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Length of the log through its last successful append
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
