//! # bitraft
//!
//! The replicated state-machine layer of a distributed key-value store:
//! - Redis-style commands classified as Write, Read or Intermediate
//! - Writes applied in log order on a single apply path
//! - Snapshot persist/restore of the whole keyspace
//! - MONITOR: live stream of executed commands to observers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (RESP, one thread per client)               │
//! └──────────┬──────────────────┬────────────────────┬──────────┘
//!            │ Write            │ Read               │ Intermediate
//!            ▼                  │                    ▼
//!   ┌─────────────────┐         │           ┌─────────────────┐
//!   │    Local Log    │         │           │ Hijack Session  │
//!   │ (apply thread)  │         │           │ (MONITOR stream)│
//!   └────────┬────────┘         │           └────────▲────────┘
//!            │ apply            │ query              │ events
//! ┌──────────▼──────────────────▼────────────────────┴──────────┐
//! │                     State Machine                            │
//! │          Router  ·  Monitor  ·  Snapshot/Restore             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │     Store     │
//!               │  (segments)   │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod storage;
pub mod protocol;
pub mod router;
pub mod monitor;
pub mod snapshot;
pub mod machine;
pub mod consensus;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BitraftError, Result};
pub use config::Config;
pub use consensus::LocalLog;
pub use machine::StateMachine;
pub use storage::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of bitraft
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
