//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use super::entry::{parse_header, MAX_ENTRY_SIZE};
use super::{WalEntry, HEADER_SIZE};
use crate::error::{Result, StrataError};

/// What the reader found at the current position
#[derive(Debug)]
pub(crate) enum Record {
    /// A complete, valid entry
    Entry(WalEntry),
    /// Clean end of file
    End,
    /// The file ends in the middle of a record (crash during append)
    Torn { offset: u64 },
    /// A complete record whose contents fail validation
    Corrupt { offset: u64, reason: String },
}

/// Reads entries from the WAL file
pub struct WalReader {
    file: BufReader<File>,
    /// Offset of the next record
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file and `WalCorruption` for a
    /// torn or invalid record.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.read_record()? {
            Record::Entry(entry) => Ok(Some(entry)),
            Record::End => Ok(None),
            Record::Torn { offset } => Err(StrataError::WalCorruption(format!(
                "partial record at offset {}",
                offset
            ))),
            Record::Corrupt { offset, reason } => Err(StrataError::WalCorruption(format!(
                "invalid record at offset {}: {}",
                offset, reason
            ))),
        }
    }

    /// Iterate over all entries; stops after the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Offset of the next record
    pub fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn read_record(&mut self) -> Result<Record> {
        let offset = self.position;

        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.file, &mut header)? {
            0 => return Ok(Record::End),
            n if n < HEADER_SIZE => return Ok(Record::Torn { offset }),
            _ => {}
        }

        let (lsn, crc, len) = parse_header(&header);
        if len > MAX_ENTRY_SIZE {
            return Ok(Record::Corrupt {
                offset,
                reason: format!("implausible record length {}", len),
            });
        }

        let mut data = vec![0u8; len as usize];
        if read_full(&mut self.file, &mut data)? < data.len() {
            return Ok(Record::Torn { offset });
        }

        match WalEntry::decode_payload(lsn, crc, &data) {
            Ok(entry) => {
                self.position += (HEADER_SIZE + data.len()) as u64;
                Ok(Record::Entry(entry))
            }
            Err(e) => Ok(Record::Corrupt {
                offset,
                reason: e.to_string(),
            }),
        }
    }
}

/// Fill `buf` as far as the file allows, returning the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
