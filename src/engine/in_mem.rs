//! In-memory engine
//!
//! A sorted map in process memory, bounded by a byte capacity. Nothing is
//! persisted.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::Engine;
use crate::batch::{self, BatchOp, StagedWrites};
use crate::config::Attributes;
use crate::error::{Result, StrataError};
use crate::keys::{validate_key, RawKeyValue};

/// Volatile engine holding all data in a `BTreeMap`
///
/// Writers take the write lock for the whole batch (stage and commit), so a
/// reader holding the read lock sees either every write of a batch or none.
pub struct InMem {
    attrs: Attributes,
    max_bytes: u64,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Sum of key and value lengths of every stored pair
    used_bytes: u64,
}

impl InMem {
    /// Create an engine that stores at most `max_bytes` of keys and values
    pub fn new(attrs: Attributes, max_bytes: u64) -> Self {
        Self {
            attrs,
            max_bytes,
            state: RwLock::new(State::default()),
        }
    }

    /// Configured capacity in bytes
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Bytes currently used by keys and values
    pub fn used_bytes(&self) -> u64 {
        self.state.read().used_bytes
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl State {
    /// Bytes used once `writes` are committed
    fn used_after(&self, writes: &StagedWrites) -> u64 {
        let mut used = self.used_bytes;
        for (key, value) in writes.iter() {
            if let Some(old) = self.data.get(key) {
                used -= (key.len() + old.len()) as u64;
            }
            if let Some(new) = value {
                used += (key.len() + new.len()) as u64;
            }
        }
        used
    }
}

impl Engine for InMem {
    fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.state.read().data.get(key).cloned())
    }

    fn scan(&self, start: &[u8], end: &[u8], max_rows: usize) -> Result<Vec<RawKeyValue>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let limit = if max_rows == 0 { usize::MAX } else { max_rows };
        let state = self.state.read();
        Ok(state
            .data
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .take(limit)
            .map(|(k, v)| RawKeyValue::new(k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let mut state = self.state.write();

        let staged = {
            let data = &state.data;
            batch::stage(ops, |key| Ok(data.get(key).cloned()))?
        };

        let used = state.used_after(&staged);
        if used > self.max_bytes {
            return Err(StrataError::CapacityExceeded {
                requested: used,
                available: self.max_bytes,
            });
        }

        for (key, value) in staged {
            match value {
                Some(v) => {
                    state.data.insert(key, v);
                }
                None => {
                    state.data.remove(&key);
                }
            }
        }
        state.used_bytes = used;
        Ok(())
    }
}
