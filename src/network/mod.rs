//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept loop polling for shutdown)
//! - One thread per connection
//! - Writes proposed to the log, reads served from local state
//! - Intermediate commands hand the connection to a hijack session

mod server;
mod connection;
mod hijack;

pub use server::{Server, ShutdownHandle};
pub use connection::Connection;
pub use hijack::{CloseReason, HijackSession, Session, SessionState};
