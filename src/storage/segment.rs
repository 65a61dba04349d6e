//! Segment files
//!
//! Append-only datafiles holding CRC-checked put/tombstone records.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncPolicy;
use crate::error::{BitraftError, Result};

/// Record header size: CRC (4) + KeyLen (4) + ValLen (4) = 12 bytes
pub const RECORD_HEADER_SIZE: usize = 12;

/// Sentinel value length indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Upper bound on key + value bytes of a single record (1 GB)
pub const MAX_RECORD_BODY: usize = 1 << 30;

/// Encode a record (value=None means tombstone)
pub(crate) fn encode_record(key: &[u8], value: Option<&[u8]>) -> Vec<u8> {
    let key_len = key.len() as u32;
    let val_len = match value {
        Some(v) => v.len() as u32,
        None => TOMBSTONE_MARKER,
    };

    let body_len = 8 + key.len() + value.map_or(0, |v| v.len());
    let mut record = Vec::with_capacity(4 + body_len);

    // CRC placeholder, patched below
    record.extend_from_slice(&[0u8; 4]);
    record.extend_from_slice(&key_len.to_le_bytes());
    record.extend_from_slice(&val_len.to_le_bytes());
    record.extend_from_slice(key);
    if let Some(v) = value {
        record.extend_from_slice(v);
    }

    let crc = crc32fast::hash(&record[4..]);
    record[0..4].copy_from_slice(&crc.to_le_bytes());
    record
}

/// Generate the file path for a segment with the given ID
pub(crate) fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:09}.data", id))
}

/// Parse a segment ID from its filename
/// "000000042.data" → Some(42)
pub(crate) fn parse_segment_id(path: &Path) -> Option<u64> {
    if path.extension()? != "data" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

// =============================================================================
// Writer
// =============================================================================

/// Backing file of a segment writer
///
/// `set_len` must leave the next write landing at the new end, which holds
/// for files opened in append mode.
pub trait SegmentFile: Write {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
    fn sync_all(&mut self) -> io::Result<()>;
}

impl SegmentFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&mut self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Appends records to the active segment
///
/// Each record goes out in a single `write_all`. If any part of an append
/// fails the file is cut back to the last complete record; if even that
/// fails the writer is poisoned and refuses further appends.
pub struct SegmentWriter<F: SegmentFile = File> {
    id: u64,
    file: F,
    /// Bytes in the file, including previously written records
    size: u64,
    sync_policy: SyncPolicy,
    poisoned: bool,
}

impl SegmentWriter<File> {
    /// Open (or create) a segment for appending
    pub fn open(dir: &Path, id: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, id))?;
        let size = file.metadata()?.len();

        Ok(Self::with_file(id, file, size, sync_policy))
    }
}

impl<F: SegmentFile> SegmentWriter<F> {
    fn with_file(id: u64, file: F, size: u64, sync_policy: SyncPolicy) -> Self {
        Self {
            id,
            file,
            size,
            sync_policy,
            poisoned: false,
        }
    }

    /// Append a record, returning the segment size afterwards
    pub fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<u64> {
        if self.poisoned {
            return Err(BitraftError::Storage(format!(
                "segment {} is unusable after a failed append",
                self.id
            )));
        }

        let value_len = value.map_or(0, |v| v.len());
        if key.len() + value_len > MAX_RECORD_BODY {
            return Err(BitraftError::Storage(
                "record exceeds segment format limits".to_string(),
            ));
        }

        let record = encode_record(key, value);
        if let Err(e) = self.write_record(&record) {
            self.rollback();
            return Err(e.into());
        }

        self.size += record.len() as u64;
        Ok(self.size)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.flush()?;
        if self.sync_policy == SyncPolicy::Always {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drop whatever part of a failed record reached the file
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.size) {
            tracing::error!(
                segment = self.id,
                size = self.size,
                error = %e,
                "failed to truncate partial record; segment poisoned"
            );
            self.poisoned = true;
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Outcome of reading one record
#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    /// A complete, checksum-valid record (value=None means tombstone)
    Record { key: Vec<u8>, value: Option<Vec<u8>> },

    /// Clean end of segment
    End,

    /// Partial or corrupt record; `valid_len` bytes precede it
    Torn { valid_len: u64 },
}

/// Sequentially reads records from a segment
pub struct SegmentReader {
    reader: BufReader<File>,
    /// Offset of the next unread record
    offset: u64,
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
        })
    }

    /// Read the next record from the segment
    pub fn next_record(&mut self) -> Result<ReadOutcome> {
        let torn = ReadOutcome::Torn {
            valid_len: self.offset,
        };

        let mut header = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(ReadOutcome::End),
            n if n < RECORD_HEADER_SIZE => return Ok(torn),
            _ => {}
        }

        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let key_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let val_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let value_len = if val_len == TOMBSTONE_MARKER {
            0
        } else {
            val_len as usize
        };

        // A garbage header must not turn into a huge allocation
        if key_len + value_len > MAX_RECORD_BODY {
            return Ok(torn);
        }

        let mut body = vec![0u8; key_len + value_len];
        if read_full(&mut self.reader, &mut body)? < body.len() {
            return Ok(torn);
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[4..]);
        hasher.update(&body);
        if hasher.finalize() != crc {
            return Ok(torn);
        }

        self.offset += (RECORD_HEADER_SIZE + body.len()) as u64;

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            Some(body.split_off(key_len))
        };
        body.truncate(key_len);

        Ok(ReadOutcome::Record { key: body, value })
    }
}

/// Read until `buf` is full or EOF; returns the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
