//! Store
//!
//! The storage adapter: a segmented append-only log plus an in-memory
//! ordered key directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::StoreOptions;
use crate::error::{BitraftError, Result};

use super::segment::{parse_segment_id, segment_path, ReadOutcome, SegmentReader, SegmentWriter};

/// Durable key-value store
///
/// ## Concurrency:
/// - `active`: Mutex held for the whole write (append + keydir update), so
///   the keydir always reflects log order
/// - `keydir`: RwLock, many concurrent readers, writer only while `active`
///   is held
/// - All methods use `&self`
///
/// Reads take the keydir lock recursively so a visitor running inside
/// `fold`/`scan` can call `get` without deadlocking behind a queued writer.
pub struct Store {
    /// Directory holding the segment files
    path: PathBuf,

    options: StoreOptions,

    /// Live keys → current values, ordered by key bytes
    keydir: RwLock<BTreeMap<Vec<u8>, Bytes>>,

    /// Segment currently receiving appends
    active: Mutex<SegmentWriter>,
}

impl Store {
    /// Open or create a store in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing segment files
    /// 3. Replay them oldest → newest into the keydir
    /// 4. Truncate a torn tail in the newest segment
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut segment_ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.is_file() {
                if let Some(id) = parse_segment_id(&file_path) {
                    segment_ids.push(id);
                }
            }
        }
        segment_ids.sort_unstable();

        let mut keydir = BTreeMap::new();
        let last = segment_ids.last().copied();

        for id in &segment_ids {
            let seg_path = segment_path(path, *id);
            let mut reader = SegmentReader::open(&seg_path)?;
            let mut replayed = 0u64;

            loop {
                match reader.next_record()? {
                    ReadOutcome::Record { key, value: Some(value) } => {
                        keydir.insert(key, Bytes::from(value));
                    }
                    ReadOutcome::Record { key, value: None } => {
                        keydir.remove(&key);
                    }
                    ReadOutcome::End => break,
                    ReadOutcome::Torn { valid_len } => {
                        if Some(*id) != last {
                            return Err(BitraftError::Storage(format!(
                                "corrupt record in sealed segment {} at offset {}",
                                seg_path.display(),
                                valid_len
                            )));
                        }

                        tracing::warn!(
                            segment = %seg_path.display(),
                            offset = valid_len,
                            "truncating torn tail of active segment"
                        );
                        let file = fs::OpenOptions::new().write(true).open(&seg_path)?;
                        file.set_len(valid_len)?;
                        file.sync_all()?;
                        break;
                    }
                }
                replayed += 1;
            }

            tracing::debug!(segment = *id, records = replayed, "replayed segment");
        }

        let active_id = last.unwrap_or(1);
        let active = SegmentWriter::open(path, active_id, options.sync_policy)?;

        tracing::debug!(
            path = %path.display(),
            keys = keydir.len(),
            segments = segment_ids.len(),
            "store opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            options,
            keydir: RwLock::new(keydir),
            active: Mutex::new(active),
        })
    }

    /// Get a value by key
    ///
    /// `None` means the key has no live value; that is not an error.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.keydir.read_recursive().get(key).cloned()
    }

    /// Put a key-value pair, overwriting any prior value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut active = self.active.lock();

        // Step 1: Append to the log (durability guarantee)
        let size = active.append(key, Some(value))?;

        // Step 2: Make it visible
        self.keydir
            .write()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));

        // Step 3: Roll over if the segment is full
        if size >= self.options.max_datafile_size {
            self.rotate(&mut active)?;
        }

        Ok(())
    }

    /// Delete a key
    ///
    /// Returns whether a live key was removed. Absent keys write nothing.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut active = self.active.lock();

        if !self.keydir.read().contains_key(key) {
            return Ok(false);
        }

        let size = active.append(key, None)?;
        self.keydir.write().remove(key);

        if size >= self.options.max_datafile_size {
            self.rotate(&mut active)?;
        }

        Ok(true)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.keydir.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live key starting with `prefix`, in ascending order
    ///
    /// An empty prefix matches all keys. A visitor error aborts the scan.
    pub fn scan<F>(&self, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let keydir = self.keydir.read_recursive();
        for key in keydir
            .range(prefix.to_vec()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
        {
            visit(key)?;
        }
        Ok(())
    }

    /// Visit every live key in ascending order
    ///
    /// The keydir read lock is held for the whole walk, so no write can land
    /// mid-fold.
    pub fn fold<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let keydir = self.keydir.read_recursive();
        for key in keydir.keys() {
            visit(key)?;
        }
        Ok(())
    }

    /// Flush and fsync the active segment
    pub fn sync(&self) -> Result<()> {
        self.active.lock().sync()
    }

    /// Directory holding this store's segments
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ID of the segment currently receiving appends
    pub fn active_segment_id(&self) -> u64 {
        self.active.lock().id()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Seal the active segment and start the next one (called with `active` held)
    fn rotate(&self, active: &mut SegmentWriter) -> Result<()> {
        active.sync()?;
        let sealed = (active.id(), active.size());
        let next_id = sealed.0 + 1;
        *active = SegmentWriter::open(&self.path, next_id, self.options.sync_policy)?;
        tracing::debug!(sealed = sealed.0, sealed_size = sealed.1, segment = next_id, "rolled over to new segment");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.active.get_mut().sync() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to sync store on close");
        }
    }
}
