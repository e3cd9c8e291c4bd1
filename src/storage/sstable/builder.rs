//! SSTable Builder
//!
//! Streams sorted entries into a new SSTable file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};
use crate::keys::display_key;

use super::{SSTable, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Writes one SSTable. Entries must arrive in strictly increasing key order.
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    /// (key, offset of its entry) for the index block
    index: Vec<(Vec<u8>, u64)>,
    /// Offset the next entry will be written at
    offset: u64,
    /// Reused encoding buffer for one entry
    scratch: Vec<u8>,
    crc: crc32fast::Hasher,
    compacted_through: u64,
}

impl SSTableBuilder {
    /// Builder for a flush output
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_compacted_through(path, 0)
    }

    /// Builder for a compaction output replacing every table up to `id`
    pub fn with_compacted_through(path: &Path, id: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        // Entry count is patched in by finish()
        writer.write_all(&encode_header(0, id))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            index: Vec::new(),
            offset: HEADER_SIZE,
            scratch: Vec::new(),
            crc: crc32fast::Hasher::new(),
            compacted_through: id,
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() as u64 >= TOMBSTONE_MARKER as u64 {
            return Err(StrataError::Storage(format!(
                "value of {} bytes is too large for an SSTable entry",
                value.len()
            )));
        }
        self.append(key, Some(value))
    }

    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.append(key, None)
    }

    fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(StrataError::Storage(format!(
                    "SSTable keys must be strictly increasing: {} after {}",
                    display_key(key),
                    display_key(last)
                )));
            }
        }

        // [key_len u32][val_len u32][key][value]
        self.scratch.clear();
        self.scratch.extend_from_slice(&(key.len() as u32).to_le_bytes());
        let val_len = value.map_or(TOMBSTONE_MARKER, |v| v.len() as u32);
        self.scratch.extend_from_slice(&val_len.to_le_bytes());
        self.scratch.extend_from_slice(key);
        if let Some(v) = value {
            self.scratch.extend_from_slice(v);
        }

        self.writer.write_all(&self.scratch)?;
        self.crc.update(&self.scratch);
        self.index.push((key.to_vec(), self.offset));
        self.offset += self.scratch.len() as u64;
        Ok(())
    }

    /// Write the index block and footer, fix up the header, fsync, and
    /// return the table's metadata
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.offset;

        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.crc.finalize();
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StrataError::Storage(format!("Failed to flush SSTable: {}", e)))?;

        let entry_count = self.index.len() as u64;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encode_header(entry_count, self.compacted_through))?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        let min_key = self.index.first().map(|(k, _)| k.clone()).unwrap_or_default();
        let max_key = self.index.pop().map(|(k, _)| k).unwrap_or_default();

        Ok(SSTable {
            path: self.path,
            entry_count,
            min_key,
            max_key,
            file_size,
            compacted_through: self.compacted_through,
        })
    }
}

fn encode_header(entry_count: u64, compacted_through: u64) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6..14].copy_from_slice(&entry_count.to_le_bytes());
    header[14..22].copy_from_slice(&compacted_through.to_le_bytes());
    header
}
