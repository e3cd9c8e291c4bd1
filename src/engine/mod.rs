//! Engine Module
//!
//! The storage contract every backend implements identically.
//!
//! ## Backends
//! - [`InMem`]: volatile, capacity-bounded, usable immediately
//! - [`DiskEngine`]: WAL + MemTable + SSTables under a data directory,
//!   usable after `start()`
//!
//! ## Guarantees
//! - Keys are ordered byte-wise; `KEY_MIN`/`KEY_MAX` bound every scan
//! - `write_batch` is all-or-nothing, and concurrent readers observe each
//!   key either before or after a batch, never in between
//! - Merges combine in issuance order
//!
//! [`increment`] and [`clear_range`] are built purely on the trait.

mod disk;
mod helpers;
mod in_mem;

pub use disk::DiskEngine;
pub use helpers::{clear_range, decode_int, encode_int, increment};
pub use in_mem::InMem;

use crate::batch::BatchOp;
use crate::config::Attributes;
use crate::error::Result;
use crate::keys::RawKeyValue;

/// A local ordered key-value store
pub trait Engine: Send + Sync {
    /// Make the engine usable. No-op for backends without a lifecycle.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources without deleting data.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Attributes describing this store
    fn attrs(&self) -> &Attributes;

    /// Current value of `key`, `Ok(None)` if unset
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Up to `max_rows` pairs with keys in `[start, end)`, ascending.
    /// `max_rows == 0` means unbounded.
    fn scan(&self, start: &[u8], end: &[u8], max_rows: usize) -> Result<Vec<RawKeyValue>>;

    /// Apply `ops` in order as one atomic unit
    fn write_batch(&self, ops: &[BatchOp]) -> Result<()>;

    /// Set `key` to `value`
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_batch(&[BatchOp::put(key, value)])
    }

    /// Remove `key`; clearing an absent key succeeds
    fn clear(&self, key: &[u8]) -> Result<()> {
        self.write_batch(&[BatchOp::delete(key)])
    }

    /// Combine an encoded `MergeValue` operand into `key`
    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        self.write_batch(&[BatchOp::merge(key, operand)])
    }
}
