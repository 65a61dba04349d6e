//! Configuration for bitraft
//!
//! Centralized configuration with sensible defaults. Built once at startup
//! and handed to each component; nothing reads configuration from globals.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BitraftError, Result};

/// Main configuration for a bitraft node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── db/              (live store segments)
    ///     └── snapshots/       (compaction snapshots)
    pub data_dir: PathBuf,

    /// Maximum key size in bytes
    pub max_key_size: usize,

    /// Maximum value size in bytes
    pub max_value_size: usize,

    /// Segment size (bytes) at which the store rolls over to a new datafile
    pub max_datafile_size: u64,

    /// When store appends are fsynced
    pub sync_policy: SyncPolicy,

    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Applied entries between compaction snapshots (0 disables)
    pub snapshot_threshold: u64,

    /// Interval of the state machine tick hook (milliseconds)
    pub tick_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Client listen address, `:port` means all interfaces
    pub bind: String,

    /// Address advertised to other cluster members
    pub advertise: String,

    /// Existing cluster member to join, if any
    pub join: Option<String>,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Monitor Configuration
    // -------------------------------------------------------------------------
    /// Pending events kept per observer before the oldest are dropped
    pub monitor_queue_capacity: usize,

    /// Time without a streamed event after which a hijacked monitor session
    /// is closed (milliseconds, 0 = none)
    pub monitor_idle_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Logging Configuration
    // -------------------------------------------------------------------------
    /// Directory for log output; stderr when unset
    pub logdir: Option<PathBuf>,
}

/// Store sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every record (safest, slowest)
    Always,

    /// leave flushing to the operating system
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_key_size: 64,
            max_value_size: 65535,
            max_datafile_size: 1 << 20, // 1 MB
            sync_policy: SyncPolicy::Always,
            snapshot_threshold: 10_000,
            tick_interval_ms: 1000,
            bind: ":4920".to_string(),
            advertise: ":5920".to_string(),
            join: None,
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            monitor_queue_capacity: 1024,
            monitor_idle_timeout_ms: 0,
            logdir: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding the live store
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Directory holding compaction snapshots
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Key/value limits enforced on incoming commands
    pub fn limits(&self) -> Limits {
        Limits {
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
        }
    }

    /// Options used whenever a store is opened for this node
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_datafile_size: self.max_datafile_size,
            sync_policy: self.sync_policy,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Resolved client listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind)
    }

    /// Resolved advertise address
    pub fn advertise_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.advertise)
    }

    /// Resolved join address, if one was given
    pub fn join_addr(&self) -> Result<Option<SocketAddr>> {
        self.join.as_deref().map(parse_addr).transpose()
    }
}

/// Size limits applied to keys and values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Config::default().limits()
    }
}

/// Options for opening a store
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub max_datafile_size: u64,
    pub sync_policy: SyncPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Config::default().store_options()
    }
}

/// Parse a listen/advertise address
///
/// Accepts `host:port`, `ip:port` and the `:port` shorthand for all
/// interfaces.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(BitraftError::Config("empty address".to_string()));
    }

    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    full.to_socket_addrs()
        .map_err(|e| BitraftError::Config(format!("error parsing addr {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| BitraftError::Config(format!("address {} did not resolve", addr)))
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Set the segment rollover size (in bytes)
    pub fn max_datafile_size(mut self, size: u64) -> Self {
        self.config.max_datafile_size = size;
        self
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync_policy = policy;
        self
    }

    /// Set the number of applied entries between snapshots
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot_threshold = entries;
        self
    }

    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.tick_interval_ms = ms;
        self
    }

    /// Set the client listen address
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind = addr.into();
        self
    }

    pub fn advertise(mut self, addr: impl Into<String>) -> Self {
        self.config.advertise = addr.into();
        self
    }

    pub fn join(mut self, addr: Option<String>) -> Self {
        self.config.join = addr;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn monitor_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.monitor_queue_capacity = capacity;
        self
    }

    pub fn monitor_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.monitor_idle_timeout_ms = ms;
        self
    }

    pub fn logdir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.logdir = dir;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
