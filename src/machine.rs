//! State Machine
//!
//! The application context the consensus engine drives. Built once at
//! startup and shared by reference; it owns the router, the live store,
//! the monitor and the configured limits.
//!
//! ## Callback Surface
//! - `apply`: committed log entry → Write command (single apply path)
//! - `query`: Read/Intermediate command against local state
//! - `tick`: periodic no-op hook
//! - `snapshot`: persist the live store to a stream
//! - `restore`: rebuild the live store from a stream

use std::fs;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{Config, Limits, StoreOptions};
use crate::error::{BitraftError, Result};
use crate::monitor::{Event, Monitor};
use crate::protocol::{Command, Reply};
use crate::router::{CommandClass, Context, Router};
use crate::snapshot::{self, CancelToken, SnapshotStats};
use crate::storage::Store;

/// A write as carried through the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub command: Command,

    /// Client that issued the command (for monitor events)
    pub addr: String,
}

impl Entry {
    pub fn new(command: Command, addr: impl Into<String>) -> Self {
        Self {
            command,
            addr: addr.into(),
        }
    }

    /// Opaque bytes handed to the log
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The consensus engine as seen by the protocol server
pub trait Consensus: Send + Sync {
    /// Order `entry` in the log and return its result once applied
    fn propose(&self, entry: Entry) -> Result<Reply>;
}

/// Replicated state machine over a `Store`
pub struct StateMachine {
    limits: Limits,
    store_options: StoreOptions,
    router: Router,
    monitor: Monitor,

    /// Live store; replaced wholesale by `restore`
    store: RwLock<Arc<Store>>,

    /// Serializes Write handlers and restores
    apply_lock: Mutex<()>,

    /// `Some(reason)` while the node must not serve commands
    not_serving: RwLock<Option<String>>,
}

impl StateMachine {
    /// Create a machine with the built-in command set
    pub fn new(config: &Config, store: Store) -> Self {
        Self::with_router(config, store, Router::with_builtins())
    }

    /// Create a machine with a custom command table
    pub fn with_router(config: &Config, store: Store, router: Router) -> Self {
        Self {
            limits: config.limits(),
            store_options: config.store_options(),
            router,
            monitor: Monitor::new(config.monitor_queue_capacity),
            store: RwLock::new(Arc::new(store)),
            apply_lock: Mutex::new(()),
            not_serving: RwLock::new(None),
        }
    }

    // =========================================================================
    // Command Paths
    // =========================================================================

    /// Validate a command and report its class
    ///
    /// The protocol server calls this before deciding whether a command
    /// goes through the log, so invalid writes never reach it.
    pub fn classify(&self, command: &Command) -> Result<CommandClass> {
        Ok(self.router.check(command, &self.limits)?.class)
    }

    /// Apply a committed log entry
    ///
    /// Only the log's apply path calls this; `apply_lock` guarantees Write
    /// handlers never run concurrently even if it is misused.
    pub fn apply(&self, data: &[u8]) -> Result<Reply> {
        let entry = Entry::decode(data)?;
        self.ensure_serving()?;

        let class = self.classify(&entry.command)?;
        if class != CommandClass::Write {
            return Err(BitraftError::Protocol(format!(
                "'{}' is not a write command",
                entry.command.name
            )));
        }

        let _apply = self.apply_lock.lock();
        self.execute(&entry.command, &entry.addr)
    }

    /// Run a Read or Intermediate command directly against local state
    pub fn query(&self, command: &Command, addr: &str) -> Result<Reply> {
        self.ensure_serving()?;

        match self.classify(command)? {
            CommandClass::Write => Err(BitraftError::Protocol(format!(
                "'{}' must be proposed to the log",
                command.name
            ))),
            CommandClass::Read => self.execute(command, addr),
            CommandClass::Intermediate => {
                let store = self.store();
                let ctx = Context { store: &store };
                self.router.dispatch(&ctx, command, &self.limits)
            }
        }
    }

    /// Periodic hook from the log
    pub fn tick(&self) {
        tracing::trace!("tick");
    }

    /// Dispatch, then publish the command to observers if its handler
    /// succeeded
    fn execute(&self, command: &Command, addr: &str) -> Result<Reply> {
        let store = self.store();
        let ctx = Context { store: &store };
        let reply = self.router.dispatch(&ctx, command, &self.limits)?;

        self.monitor.publish(Event::now(addr, command.to_parts()));
        Ok(reply)
    }

    // =========================================================================
    // Snapshot / Restore
    // =========================================================================

    /// Persist the live store to `writer`
    pub fn snapshot<W: Write>(&self, writer: &mut W, cancel: &CancelToken) -> Result<SnapshotStats> {
        let store = self.store();
        snapshot::persist(&store, writer, cancel)
    }

    /// Replace the live store with the contents of a snapshot stream
    ///
    /// The snapshot is restored into a staging directory next to the live
    /// store and swapped in only once complete. Until then, and for good if
    /// it fails, the machine refuses commands.
    pub fn restore<R: Read>(&self, reader: &mut R, cancel: &CancelToken) -> Result<SnapshotStats> {
        let _apply = self.apply_lock.lock();
        *self.not_serving.write() = Some("restoring from snapshot".to_string());

        match self.restore_locked(reader, cancel) {
            Ok(stats) => {
                *self.not_serving.write() = None;
                tracing::info!(records = stats.records, bytes = stats.bytes, "restored from snapshot");
                Ok(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "snapshot restore failed, refusing commands");
                *self.not_serving.write() = Some(format!("snapshot restore failed: {}", e));
                Err(e)
            }
        }
    }

    fn restore_locked<R: Read>(&self, reader: &mut R, cancel: &CancelToken) -> Result<SnapshotStats> {
        let live_path = self.store().path().to_path_buf();
        let staging = live_path.with_extension("restore");

        let (staged, stats) = snapshot::restore(reader, &staging, self.store_options, cancel)?;
        drop(staged);

        let mut current = self.store.write();
        fs::remove_dir_all(&live_path)?;
        fs::rename(&staging, &live_path)?;
        *current = Arc::new(Store::open(&live_path, self.store_options)?);

        Ok(stats)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current live store
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store.read())
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn is_serving(&self) -> bool {
        self.not_serving.read().is_none()
    }

    fn ensure_serving(&self) -> Result<()> {
        match self.not_serving.read().as_ref() {
            Some(reason) => Err(BitraftError::NotServing(reason.clone())),
            None => Ok(()),
        }
    }
}
