//! Error types for stratakv
//!
//! Provides a unified error type for all engine operations. Every error
//! returned from a mutating call means the call had no effect on stored state.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for stratakv operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // Contract Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("key {key} with value {current} incremented by {delta} results in overflow")]
    Overflow { key: String, current: i64, delta: i64 },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Capacity exceeded: {requested} bytes requested, {available} available")]
    CapacityExceeded { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
