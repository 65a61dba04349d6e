//! Local Log
//!
//! Single-node stand-in for the consensus engine. It provides the one
//! property the state machine relies on: every write is assigned a log
//! index and applied exactly once, in index order, on a single apply
//! thread.
//!
//! ## Responsibilities
//! - Order proposals and apply them on the apply thread
//! - Drive the state machine's tick hook
//! - Compact: persist a snapshot every `snapshot_threshold` entries
//! - Install a snapshot file on demand
//!
//! ## Snapshot Files
//! ```text
//! {snapshot_dir}/
//!   └── snapshot-00000000000000010000.snap   (index of last applied entry)
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{BitraftError, Result};
use crate::machine::{Consensus, Entry, StateMachine};
use crate::protocol::Reply;
use crate::snapshot::{CancelToken, SnapshotStats};

const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_EXT: &str = "snap";

/// Log settings
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Applied entries between automatic snapshots (0 disables)
    pub snapshot_threshold: u64,
    pub tick_interval: Duration,
    pub snapshot_dir: PathBuf,
}

impl LogOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot_threshold: config.snapshot_threshold,
            tick_interval: config.tick_interval(),
            snapshot_dir: config.snapshot_dir(),
        }
    }
}

/// Work items for the apply thread
enum Request {
    Propose {
        data: Vec<u8>,
        reply: Sender<Result<Reply>>,
    },
    Compact {
        reply: Sender<Result<PathBuf>>,
    },
    Install {
        path: PathBuf,
        reply: Sender<Result<SnapshotStats>>,
    },
}

/// Single-node replicated log
pub struct LocalLog {
    /// Taken on shutdown; the apply thread exits once all senders are gone
    tx: Mutex<Option<Sender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancelToken,
    applied: Arc<AtomicU64>,
}

impl LocalLog {
    /// Start the apply thread
    ///
    /// Indices continue from the newest snapshot in `snapshot_dir`.
    pub fn start(machine: Arc<StateMachine>, options: LogOptions) -> Result<Self> {
        fs::create_dir_all(&options.snapshot_dir)?;

        let start_index = latest_snapshot(&options.snapshot_dir)?
            .map(|(index, _)| index)
            .unwrap_or(0);

        let (tx, rx) = channel::unbounded();
        let cancel = CancelToken::new();
        let applied = Arc::new(AtomicU64::new(start_index));

        let worker = {
            let cancel = cancel.clone();
            let applied = Arc::clone(&applied);
            thread::Builder::new()
                .name("apply".to_string())
                .spawn(move || ApplyLoop::new(machine, options, cancel, applied).run(rx))?
        };

        tracing::info!(index = start_index, "log started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            cancel,
            applied,
        })
    }

    /// Index of the last applied entry
    pub fn applied_index(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Persist a snapshot now; returns the snapshot file
    pub fn compact(&self) -> Result<PathBuf> {
        let (reply, rx) = channel::bounded(1);
        self.send(Request::Compact { reply })?;
        rx.recv().map_err(|_| BitraftError::Shutdown)?
    }

    /// Replace the state machine's data with a snapshot file
    pub fn install_snapshot(&self, path: &Path) -> Result<SnapshotStats> {
        let (reply, rx) = channel::bounded(1);
        self.send(Request::Install {
            path: path.to_path_buf(),
            reply,
        })?;
        rx.recv().map_err(|_| BitraftError::Shutdown)?
    }

    /// Stop the apply thread
    ///
    /// Queued proposals are still applied; an in-flight snapshot is
    /// cancelled. Later calls fail with `Shutdown`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        drop(self.tx.lock().take());

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("apply thread panicked");
            }
            tracing::info!(index = self.applied_index(), "log stopped");
        }
    }

    fn send(&self, request: Request) -> Result<()> {
        let tx = self.tx.lock().clone().ok_or(BitraftError::Shutdown)?;
        tx.send(request).map_err(|_| BitraftError::Shutdown)
    }
}

impl Consensus for LocalLog {
    fn propose(&self, entry: Entry) -> Result<Reply> {
        let data = entry.encode()?;
        let (reply, rx) = channel::bounded(1);
        self.send(Request::Propose { data, reply })?;
        rx.recv().map_err(|_| BitraftError::Shutdown)?
    }
}

impl Drop for LocalLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Apply Thread
// =============================================================================

struct ApplyLoop {
    machine: Arc<StateMachine>,
    options: LogOptions,
    cancel: CancelToken,
    applied: Arc<AtomicU64>,
    since_snapshot: u64,
}

impl ApplyLoop {
    fn new(
        machine: Arc<StateMachine>,
        options: LogOptions,
        cancel: CancelToken,
        applied: Arc<AtomicU64>,
    ) -> Self {
        Self {
            machine,
            options,
            cancel,
            applied,
            since_snapshot: 0,
        }
    }

    fn run(mut self, rx: Receiver<Request>) {
        let ticker = channel::tick(self.options.tick_interval);

        loop {
            crossbeam::select! {
                recv(rx) -> request => match request {
                    Ok(request) => self.handle(request),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.machine.tick(),
            }
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Propose { data, reply } => {
                let index = self.applied.load(Ordering::SeqCst) + 1;
                let result = self.machine.apply(&data);
                self.applied.store(index, Ordering::SeqCst);
                let _ = reply.send(result);

                self.since_snapshot += 1;
                let threshold = self.options.snapshot_threshold;
                if threshold > 0 && self.since_snapshot >= threshold {
                    // A failed compaction is retried at the next threshold
                    if let Err(e) = self.compact() {
                        tracing::warn!(index, error = %e, "compaction failed");
                    }
                    self.since_snapshot = 0;
                }
            }
            Request::Compact { reply } => {
                let _ = reply.send(self.compact());
            }
            Request::Install { path, reply } => {
                let _ = reply.send(self.install(&path));
            }
        }
    }

    /// Persist a snapshot at the current index
    ///
    /// Written to a temp file and renamed, so a crash never leaves a
    /// partial snapshot under the final name. Older snapshots are removed.
    fn compact(&self) -> Result<PathBuf> {
        let index = self.applied.load(Ordering::SeqCst);
        let dir = &self.options.snapshot_dir;
        let final_path = snapshot_path(dir, index);
        let tmp_path = final_path.with_extension("tmp");

        let result = (|| {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            let stats = self.machine.snapshot(&mut writer, &self.cancel)?;
            let file = writer
                .into_inner()
                .map_err(|e| BitraftError::Io(e.into_error()))?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok::<_, BitraftError>(stats)
        })();

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        tracing::info!(
            index,
            records = stats.records,
            bytes = stats.bytes,
            path = %final_path.display(),
            "snapshot persisted"
        );

        for (old_index, old_path) in list_snapshots(dir)? {
            if old_index < index {
                if let Err(e) = fs::remove_file(&old_path) {
                    tracing::warn!(path = %old_path.display(), error = %e, "failed to remove old snapshot");
                }
            }
        }

        Ok(final_path)
    }

    fn install(&self, path: &Path) -> Result<SnapshotStats> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let stats = self.machine.restore(&mut reader, &self.cancel)?;

        if let Some(index) = parse_snapshot_index(path) {
            self.applied.store(index, Ordering::SeqCst);
        }
        Ok(stats)
    }
}

// =============================================================================
// Snapshot Files
// =============================================================================

fn snapshot_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:020}.{}", SNAPSHOT_PREFIX, index, SNAPSHOT_EXT))
}

/// "snapshot-00000000000000000042.snap" → Some(42)
fn parse_snapshot_index(path: &Path) -> Option<u64> {
    if path.extension()? != SNAPSHOT_EXT {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SNAPSHOT_PREFIX)?
        .parse()
        .ok()
}

/// All complete snapshots in `dir`, oldest first
fn list_snapshots(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(index) = parse_snapshot_index(&path) {
            snapshots.push((index, path));
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

/// Newest complete snapshot in `dir`
pub fn latest_snapshot(dir: &Path) -> Result<Option<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(None);
    }
    Ok(list_snapshots(dir)?.pop())
}
