//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StrataError};

use super::iterator::SSTableIterator;
use super::{read_u32, read_u64, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Outcome of a point lookup in one SSTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The table holds a live value for the key
    Value(Vec<u8>),
    /// The table holds a tombstone: the key is deleted as of this table
    Tombstone,
    /// The table says nothing about the key; consult older tables
    Absent,
}

/// Reader for SSTable files with in-memory index for O(log n) lookups
///
/// The file handle sits behind a mutex so lookups only need `&self`; the
/// StorageManager can then serve reads under a shared lock.
pub struct SSTableReader {
    path: PathBuf,
    /// File handle for reading entries
    pub(super) file: Mutex<BufReader<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// Index block starting offset (end of the data block)
    pub(super) index_offset: u64,
    compacted_through: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Validates header, footer and data checksum, then loads the entire
    /// index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StrataError::Storage(format!(
                "SSTable {} is too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(StrataError::Storage(format!(
                "Invalid SSTable magic: expected STKV, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(StrataError::Storage(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }

        let entry_count = read_u64(&header, 6);
        let compacted_through = read_u64(&header, 14);

        // Read footer to get index offset
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = read_u64(&footer, 0);
        let data_crc = read_u32(&footer, 8);

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(StrataError::Storage(format!(
                "SSTable {} has invalid index offset {}",
                path.display(),
                index_offset
            )));
        }

        verify_data_crc(&mut file, index_offset, data_crc, path)?;

        // Index block size = file_size - footer_size - index_offset
        file.seek(SeekFrom::Start(index_offset))?;
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        // Parse index entries: [key_len(4)][offset(8)][key]
        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < index_data.len() {
            if pos + 12 > index_data.len() {
                return Err(truncated_index(path));
            }
            let key_len = read_u32(&index_data, pos) as usize;
            let offset = read_u64(&index_data, pos + 4);
            pos += 12;

            if pos + key_len > index_data.len() {
                return Err(truncated_index(path));
            }
            index.insert(index_data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }

        if index.len() as u64 != entry_count {
            return Err(StrataError::Storage(format!(
                "SSTable {} index holds {} keys, header says {}",
                path.display(),
                index.len(),
                entry_count
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            compacted_through,
        })
    }

    /// Point lookup, O(log n) via the in-memory index
    pub fn get(&self, key: &[u8]) -> Result<Lookup> {
        match self.index.get(key) {
            Some(&offset) => Ok(match self.read_value_at(offset)? {
                Some(value) => Lookup::Value(value),
                None => Lookup::Tombstone,
            }),
            None => Ok(Lookup::Absent),
        }
    }

    /// Read the value of the entry starting at `offset` (`None` = tombstone)
    pub fn read_value_at(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;

        let key_len = read_u32(&header, 0);
        let val_len = read_u32(&header, 4);

        // Skip the key (the index already matched it)
        file.seek(SeekFrom::Current(key_len as i64))?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(None);
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;
        Ok(Some(value))
    }

    /// Index entries with keys in `[start, end)`, in key order
    pub fn index_range<'a>(
        &'a self,
        start: &'a [u8],
        end: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], u64)> + 'a {
        let range = if start < end {
            Some(
                self.index
                    .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end))),
            )
        } else {
            None
        };
        range
            .into_iter()
            .flatten()
            .map(|(k, &offset)| (k.as_slice(), offset))
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Highest SSTable id this table replaces (0 for flush output)
    pub fn compacted_through(&self) -> u64 {
        self.compacted_through
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty SSTable
        }
    }

    /// Iterate over all entries in key order (for compaction, debugging)
    ///
    /// Holds the file lock until the iterator is dropped.
    pub fn iter(&self) -> Result<SSTableIterator<'_>> {
        SSTableIterator::new(self.file.lock(), self.index_offset)
    }
}

fn verify_data_crc(file: &mut File, index_offset: u64, expected: u32, path: &Path) -> Result<()> {
    file.seek(SeekFrom::Start(HEADER_SIZE))?;
    let mut remaining = index_offset - HEADER_SIZE;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    let actual = hasher.finalize();
    if actual != expected {
        return Err(StrataError::Storage(format!(
            "SSTable {} data CRC mismatch: expected {:#010x}, got {:#010x}",
            path.display(),
            expected,
            actual
        )));
    }
    Ok(())
}

fn truncated_index(path: &Path) -> StrataError {
    StrataError::Storage(format!("SSTable {} has a truncated index block", path.display()))
}
