//! Error types for bitraft
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BitraftError
pub type Result<T> = std::result::Result<T, BitraftError>;

/// Unified error type for bitraft operations
#[derive(Debug, Error)]
pub enum BitraftError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Command Errors (rejected before any state is touched)
    // -------------------------------------------------------------------------
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Snapshot cancelled")]
    SnapshotCancelled,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("node is not serving: {0}")]
    NotServing(String),

    #[error("log is shut down")]
    Shutdown,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BitraftError {
    /// Text sent to the client in an error reply
    ///
    /// Command-level errors mirror the wording Redis clients expect.
    pub fn reply_message(&self) -> String {
        match self {
            BitraftError::NotServing(_) => format!("LOADING {}", self),
            other => format!("ERR {}", other),
        }
    }

    /// Whether this error was raised by command validation
    ///
    /// Validation errors never touch state; the connection keeps going.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BitraftError::UnknownCommand(_)
                | BitraftError::WrongArgCount(_)
                | BitraftError::KeyTooLarge { .. }
                | BitraftError::ValueTooLarge { .. }
        )
    }
}
