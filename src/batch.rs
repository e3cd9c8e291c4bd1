//! Write batches
//!
//! A batch is an ordered list of mutations applied to one engine as a unit.
//! Backends never apply ops one by one against live state. Instead `stage`
//! replays the ops over a private overlay and produces the final outcome for
//! every touched key; the backend then commits that outcome in one step. Any
//! error during staging happens before anything is written.

use std::collections::BTreeMap;

use crate::error::{Result, StrataError};
use crate::keys::{display_key, validate_key};
use crate::merge;

/// One mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Overwrite the key with a value
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Remove the key
    Delete { key: Vec<u8> },

    /// Combine an encoded `MergeValue` operand into the key's value
    Merge { key: Vec<u8>, operand: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    pub fn merge(key: impl Into<Vec<u8>>, operand: impl Into<Vec<u8>>) -> Self {
        BatchOp::Merge {
            key: key.into(),
            operand: operand.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } | BatchOp::Merge { key, .. } => key,
        }
    }
}

/// Final state of every key a batch touches. `None` means delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagedWrites {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StagedWrites {
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Final outcome for a key, `None` if the batch does not touch it
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|v| v.as_deref())
    }

    /// Writes in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.writes
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}

impl IntoIterator for StagedWrites {
    type Item = (Vec<u8>, Option<Vec<u8>>);
    type IntoIter = std::collections::btree_map::IntoIter<Vec<u8>, Option<Vec<u8>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// Resolve `ops` into their combined effect.
///
/// `read` returns the committed value of a key; it is called at most once per
/// key and only for keys whose first op in the batch is a merge. The caller
/// must keep committed state stable until the staged writes are applied.
pub fn stage<F>(ops: &[BatchOp], mut read: F) -> Result<StagedWrites>
where
    F: FnMut(&[u8]) -> Result<Option<Vec<u8>>>,
{
    let mut writes: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();

    for op in ops {
        validate_key(op.key())?;

        match op {
            BatchOp::Put { key, value } => {
                writes.insert(key.clone(), Some(value.clone()));
            }
            BatchOp::Delete { key } => {
                writes.insert(key.clone(), None);
            }
            BatchOp::Merge { key, operand } => {
                let existing = match writes.get(key.as_slice()) {
                    Some(staged) => staged.clone(),
                    None => read(key)?,
                };
                let merged = merge::merge(existing.as_deref(), operand).map_err(|e| match e {
                    StrataError::Overflow { current, delta, .. } => StrataError::Overflow {
                        key: display_key(key),
                        current,
                        delta,
                    },
                    other => other,
                })?;
                writes.insert(key.clone(), Some(merged));
            }
        }
    }

    Ok(StagedWrites { writes })
}
