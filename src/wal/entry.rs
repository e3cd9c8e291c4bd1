//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::batch::StagedWrites;
use crate::error::{Result, StrataError};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single record payload; anything larger is treated as a
/// corrupt length field.
pub(crate) const MAX_ENTRY_SIZE: u32 = 1 << 30;

/// A single entry in the WAL: every write of one committed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The writes to replay, in key order
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    /// Turn staged batch writes into log operations
    pub fn from_staged(writes: &StagedWrites) -> Vec<Operation> {
        writes
            .iter()
            .map(|(key, value)| match value {
                Some(v) => Operation::Put {
                    key: key.to_vec(),
                    value: v.to_vec(),
                },
                None => Operation::Delete { key: key.to_vec() },
            })
            .collect()
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Encode as `[lsn][crc][len][data]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(self)
            .map_err(|e| StrataError::Serialization(format!("WAL entry: {}", e)))?;
        if data.len() as u64 > MAX_ENTRY_SIZE as u64 {
            return Err(StrataError::Serialization(format!(
                "WAL entry of {} bytes exceeds limit of {} bytes",
                data.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let crc = crc32fast::hash(&data);
        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Decode one complete record, validating length, CRC and LSN
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StrataError::WalCorruption(format!(
                "record of {} bytes is shorter than the {} byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        let (lsn, crc, len) = parse_header(&bytes[..HEADER_SIZE]);
        let data = &bytes[HEADER_SIZE..];
        if data.len() != len as usize {
            return Err(StrataError::WalCorruption(format!(
                "record length mismatch: header says {}, got {}",
                len,
                data.len()
            )));
        }
        Self::decode_payload(lsn, crc, data)
    }

    pub(crate) fn decode_payload(lsn: u64, crc: u32, data: &[u8]) -> Result<Self> {
        let actual = crc32fast::hash(data);
        if actual != crc {
            return Err(StrataError::WalCorruption(format!(
                "CRC mismatch at LSN {}: expected {:#010x}, got {:#010x}",
                lsn, crc, actual
            )));
        }
        let entry: WalEntry = bincode::deserialize(data)
            .map_err(|e| StrataError::WalCorruption(format!("undecodable entry: {}", e)))?;
        if entry.lsn != lsn {
            return Err(StrataError::WalCorruption(format!(
                "header LSN {} does not match entry LSN {}",
                lsn, entry.lsn
            )));
        }
        Ok(entry)
    }
}

/// Split a header into (lsn, crc, len)
pub(crate) fn parse_header(header: &[u8]) -> (u64, u32, u32) {
    let mut lsn = [0u8; 8];
    let mut crc = [0u8; 4];
    let mut len = [0u8; 4];
    lsn.copy_from_slice(&header[0..8]);
    crc.copy_from_slice(&header[8..12]);
    len.copy_from_slice(&header[12..16]);
    (
        u64::from_le_bytes(lsn),
        u32::from_le_bytes(crc),
        u32::from_le_bytes(len),
    )
}
