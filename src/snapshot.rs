//! Snapshot Codec
//!
//! Serializes the whole key space for log compaction and rebuilds a store
//! from such a stream for recovery and catch-up.
//!
//! ## Stream Format
//! ```text
//! ┌────────────────┬───────┬────────────────┬─────────┐
//! │ KeyLen u64 (8) │  Key  │ ValLen u64 (8) │  Value  │  ... repeated
//! └────────────────┴───────┴────────────────┴─────────┘
//! ```
//! Little endian. No record count and no trailer: the stream ends where
//! the input ends. A record cut short anywhere is unrecoverable.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::StoreOptions;
use crate::error::{BitraftError, Result};
use crate::storage::{Store, MAX_RECORD_BODY};

/// Shared cancellation flag for long-running snapshot I/O
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(BitraftError::SnapshotCancelled);
        }
        Ok(())
    }
}

/// Statistics for a finished persist or restore
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    pub records: u64,
    pub bytes: u64,
}

/// Write every live key/value of `store` to `writer`
///
/// Keys are visited in ascending order; each value is re-read while the
/// fold holds the key directory, so the stream is a point-in-time image.
pub fn persist<W: Write>(store: &Store, writer: &mut W, cancel: &CancelToken) -> Result<SnapshotStats> {
    let mut stats = SnapshotStats::default();

    store.fold(|key| {
        cancel.check()?;

        let value = store.get(key).ok_or_else(|| {
            BitraftError::Storage(format!(
                "key {:?} vanished during snapshot",
                String::from_utf8_lossy(key)
            ))
        })?;

        writer.write_all(&(key.len() as u64).to_le_bytes())?;
        writer.write_all(key)?;
        writer.write_all(&(value.len() as u64).to_le_bytes())?;
        writer.write_all(&value)?;

        stats.records += 1;
        stats.bytes += 16 + key.len() as u64 + value.len() as u64;
        Ok(())
    })?;

    writer.flush()?;
    Ok(stats)
}

/// Build a fresh store at `target` from a snapshot stream
///
/// Anything already at `target` is removed first. A record whose key and
/// value together exceed `MAX_RECORD_BODY` cannot be stored and is
/// `CorruptSnapshot`, as is a record cut short. The configured key and value
/// limits apply to client commands only, so a snapshot taken under larger
/// limits still restores. On any error the partial store is removed again
/// so no half-restored dataset survives.
pub fn restore<R: Read>(
    reader: &mut R,
    target: &Path,
    options: StoreOptions,
    cancel: &CancelToken,
) -> Result<(Store, SnapshotStats)> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }

    let store = Store::open(target, options)?;
    match restore_into(reader, &store, cancel) {
        Ok(stats) => {
            store.sync()?;
            Ok((store, stats))
        }
        Err(e) => {
            drop(store);
            if let Err(cleanup) = fs::remove_dir_all(target) {
                tracing::warn!(path = %target.display(), error = %cleanup, "failed to remove partial restore");
            }
            Err(e)
        }
    }
}

fn restore_into<R: Read>(
    reader: &mut R,
    store: &Store,
    cancel: &CancelToken,
) -> Result<SnapshotStats> {
    let mut stats = SnapshotStats::default();

    loop {
        cancel.check()?;

        // Clean EOF is only allowed before a record starts
        let key_len = match read_len(reader, stats.records)? {
            Some(len) => len,
            None => break,
        };
        check_len(key_len, MAX_RECORD_BODY, "key", stats.records)?;
        let key = read_exact_or_corrupt(reader, key_len, "key", stats.records)?;

        let val_len = read_len(reader, stats.records)?.ok_or_else(|| {
            BitraftError::CorruptSnapshot(format!(
                "record {}: stream ended before value length",
                stats.records
            ))
        })?;
        check_len(val_len, MAX_RECORD_BODY - key_len, "value", stats.records)?;
        let value = read_exact_or_corrupt(reader, val_len, "value", stats.records)?;

        store.put(&key, &value)?;
        stats.records += 1;
        stats.bytes += 16 + key_len as u64 + val_len as u64;
    }

    Ok(stats)
}

/// Read a u64 length prefix; `None` on EOF before its first byte
fn read_len<R: Read>(reader: &mut R, record: u64) -> Result<Option<usize>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        8 => Ok(Some(u64::from_le_bytes(buf) as usize)),
        n => Err(BitraftError::CorruptSnapshot(format!(
            "record {}: truncated length prefix ({} of 8 bytes)",
            record, n
        ))),
    }
}

fn check_len(len: usize, max: usize, what: &str, record: u64) -> Result<()> {
    if len > max {
        return Err(BitraftError::CorruptSnapshot(format!(
            "record {}: {} length {} exceeds limit {}",
            record, what, len, max
        )));
    }
    Ok(())
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, len: usize, what: &str, record: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            BitraftError::CorruptSnapshot(format!(
                "record {}: stream ended inside {} ({} bytes expected)",
                record, what, len
            ))
        } else {
            BitraftError::Io(e)
        }
    })?;
    Ok(buf)
}
