//! Helpers built only on the `Engine` contract

use super::Engine;
use crate::batch::BatchOp;
use crate::error::{Result, StrataError};
use crate::keys::display_key;

/// Encode an integer the way `increment` stores it
pub fn encode_int(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a value written by `increment`
pub fn decode_int(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        StrataError::Encoding(format!(
            "integer value must be 8 bytes, found {}",
            bytes.len()
        ))
    })?;
    Ok(i64::from_be_bytes(raw))
}

/// Add `delta` to the integer stored at `key` and return the new value.
///
/// An absent key counts as 0. A `delta` of 0 reads without writing. On
/// overflow nothing is written.
///
/// This is a read followed by a put, so two callers incrementing the same key
/// concurrently can lose an update.
pub fn increment<E>(engine: &E, key: &[u8], delta: i64) -> Result<i64>
where
    E: Engine + ?Sized,
{
    let current = match engine.get(key)? {
        Some(bytes) => decode_int(&bytes)?,
        None => 0,
    };
    if delta == 0 {
        return Ok(current);
    }

    let next = current
        .checked_add(delta)
        .ok_or_else(|| StrataError::Overflow {
            key: display_key(key),
            current,
            delta,
        })?;
    engine.put(key, &encode_int(next))?;
    Ok(next)
}

/// Delete the keys in `[start, end)`, at most `max_entries` of them
/// (0 = all), in one atomic batch. Returns how many keys were deleted.
pub fn clear_range<E>(engine: &E, start: &[u8], end: &[u8], max_entries: usize) -> Result<usize>
where
    E: Engine + ?Sized,
{
    let rows = engine.scan(start, end, max_entries)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let ops: Vec<BatchOp> = rows.into_iter().map(|kv| BatchOp::delete(kv.key)).collect();
    engine.write_batch(&ops)?;
    Ok(ops.len())
}
