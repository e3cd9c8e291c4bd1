//! Storage Module
//!
//! Persistent storage layer of the disk engine using SSTables.
//!
//! ## Responsibilities
//! - Persist data to disk in sorted format
//! - Point lookups and range scans, newest table first
//! - Full compaction that drops tombstones and shadowed values
//!
//! ## File Format
//! See [`sstable`] for the byte layout. Files are named
//! `sstable_NNNNNN.sst`; higher ids hold newer data. New files are written
//! as `*.sst.tmp` and renamed once complete.

mod sstable;
mod manager;

pub use sstable::{Lookup, SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
pub use manager::StorageManager;
