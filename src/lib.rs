//! # stratakv
//!
//! Ordered key-value storage engines behind one contract:
//! - Byte-wise ordered keys bounded by `KEY_MIN` / `KEY_MAX`
//! - Atomic write batches; readers never observe half a batch
//! - Merge operators (ordered append, checked counters)
//! - `increment` and `clear_range` built on the contract
//!
//! Two interchangeable backends implement [`Engine`]: [`InMem`] and the
//! durable [`DiskEngine`].
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Engine trait  (+ increment, clear_range)        │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!         ┌─────────────┐               ┌──────────────┐
//!         │    InMem    │               │  DiskEngine  │
//!         │  (RwLock)   │               │ (SWMR, WAL)  │
//!         └─────────────┘               └──────┬───────┘
//!                                              │
//!                          ┌───────────────────┼──────────────┐
//!                          ▼                   ▼              ▼
//!                   ┌─────────────┐    ┌─────────────┐ ┌─────────────┐
//!                   │     WAL     │    │  MemTable   │ │   Storage   │
//!                   │  (Append)   │    │  (RwLock)   │ │  (SSTable)  │
//!                   └─────────────┘    └─────────────┘ └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use stratakv::{Attributes, Engine, InMem, KEY_MAX, KEY_MIN};
//!
//! let engine = InMem::new(Attributes::new(["mem"]), 1 << 20);
//! engine.put(b"a", b"1").unwrap();
//! let rows = engine.scan(KEY_MIN, KEY_MAX, 0).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod keys;

pub mod batch;
pub mod merge;

pub mod memtable;
pub mod storage;
pub mod wal;

pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::BatchOp;
pub use config::{Attributes, Config, WalSyncStrategy};
pub use engine::{clear_range, increment, DiskEngine, Engine, InMem};
pub use error::{Result, StrataError};
pub use keys::{RawKeyValue, KEY_MAX, KEY_MIN};
pub use merge::MergeValue;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of stratakv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
