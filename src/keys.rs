//! Key model
//!
//! Keys are byte strings ordered byte-wise. Two sentinels bound the keyspace:
//! `KEY_MIN` (the empty key, lowest possible) and `KEY_MAX`. Neither can be
//! written; every key at or above `KEY_MAX` is reserved so `KEY_MAX` sorts
//! after anything ever stored.

use crate::error::{Result, StrataError};

/// Lowest possible key. Valid as a scan start, never as a mutation target.
pub const KEY_MIN: &[u8] = b"";

/// Artificial highest key. Valid as a scan end, never stored.
pub const KEY_MAX: &[u8] = b"\xff\xff";

/// A key/value pair produced by a range scan
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawKeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawKeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Check that a key may be read or written
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StrataError::InvalidKey("empty key".to_string()));
    }
    if key >= KEY_MAX {
        return Err(StrataError::InvalidKey(format!(
            "key {} is in the reserved range at or above KEY_MAX",
            display_key(key)
        )));
    }
    Ok(())
}

/// Lossy printable form of a key for messages and logs
pub fn display_key(key: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(key))
}
