//! Merge operators
//!
//! A merge combines a new operand with whatever a key already holds instead
//! of overwriting it. Operands and accumulated values are `MergeValue`s
//! serialized with bincode; the enum variant index is the discriminant that
//! selects the combinator.
//!
//! Combinators must be associative but need not be commutative: `Appender`
//! concatenates payloads in exactly the order the merges were issued.
//!
//! ```
//! use stratakv::merge::{merge, MergeValue};
//!
//! let x = MergeValue::Appender(b"x".to_vec()).encode().unwrap();
//! let y = MergeValue::Appender(b"y".to_vec()).encode().unwrap();
//!
//! let acc = merge(None, &x).unwrap();
//! let acc = merge(Some(&acc), &y).unwrap();
//! assert_eq!(MergeValue::decode(&acc).unwrap(), MergeValue::Appender(b"xy".to_vec()));
//! ```

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// A value understood by one of the built-in combinators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeValue {
    /// Byte payloads concatenated in application order
    Appender(Vec<u8>),

    /// Signed 64-bit counter, summed with overflow detection
    Counter(i64),
}

/// Discriminant of a `MergeValue`, one per combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Appender = 0,
    Counter = 1,
}

type CombineFn = fn(MergeValue, MergeValue) -> Result<MergeValue>;

/// A named combinator: `combine(accumulated, operand) -> accumulated'`
pub struct Combinator {
    pub kind: MergeKind,
    pub name: &'static str,
    combine: CombineFn,
}

/// Built-in combinators, indexed by `MergeKind`
pub static COMBINATORS: [Combinator; 2] = [
    Combinator {
        kind: MergeKind::Appender,
        name: "appender",
        combine: append,
    },
    Combinator {
        kind: MergeKind::Counter,
        name: "counter",
        combine: add,
    },
];

impl MergeKind {
    pub fn combinator(self) -> &'static Combinator {
        &COMBINATORS[self as usize]
    }
}

impl MergeValue {
    pub fn kind(&self) -> MergeKind {
        match self {
            MergeValue::Appender(_) => MergeKind::Appender,
            MergeValue::Counter(_) => MergeKind::Counter,
        }
    }

    /// Serialize to the stored/transferred form
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec()
            .serialize(self)
            .map_err(|e| StrataError::Encoding(format!("failed to encode merge value: {}", e)))
    }

    /// Parse the stored/transferred form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec()
            .deserialize(bytes)
            .map_err(|e| StrataError::Encoding(format!("failed to decode merge value: {}", e)))
    }
}

/// Combine `operand` into the `existing` value of a key.
///
/// - absent existing value: the operand becomes the value
/// - existing value that is not a `MergeValue` (e.g. written by a put):
///   the operand replaces it
/// - mismatched kinds: `Encoding` error
pub fn merge(existing: Option<&[u8]>, operand: &[u8]) -> Result<Vec<u8>> {
    let operand = MergeValue::decode(operand)?;

    let accumulated = match existing.map(MergeValue::decode) {
        Some(Ok(value)) => value,
        None | Some(Err(_)) => return operand.encode(),
    };

    if accumulated.kind() != operand.kind() {
        return Err(StrataError::Encoding(format!(
            "cannot merge {} operand into {} value",
            operand.kind().combinator().name,
            accumulated.kind().combinator().name
        )));
    }

    let combinator = operand.kind().combinator();
    (combinator.combine)(accumulated, operand)?.encode()
}

// =============================================================================
// Combinators
// =============================================================================

fn append(accumulated: MergeValue, operand: MergeValue) -> Result<MergeValue> {
    match (accumulated, operand) {
        (MergeValue::Appender(mut acc), MergeValue::Appender(tail)) => {
            acc.extend_from_slice(&tail);
            Ok(MergeValue::Appender(acc))
        }
        (acc, op) => Err(kind_mismatch("appender", &acc, &op)),
    }
}

fn add(accumulated: MergeValue, operand: MergeValue) -> Result<MergeValue> {
    match (accumulated, operand) {
        (MergeValue::Counter(current), MergeValue::Counter(delta)) => current
            .checked_add(delta)
            .map(MergeValue::Counter)
            .ok_or(StrataError::Overflow {
                key: "<merge>".to_string(),
                current,
                delta,
            }),
        (acc, op) => Err(kind_mismatch("counter", &acc, &op)),
    }
}

fn kind_mismatch(name: &str, accumulated: &MergeValue, operand: &MergeValue) -> StrataError {
    StrataError::Encoding(format!(
        "{} combinator given {:?} and {:?}",
        name,
        accumulated.kind(),
        operand.kind()
    ))
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}
