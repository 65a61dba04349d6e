//! Reply definitions
//!
//! Represents replies to clients.

use bytes::Bytes;

/// A reply to send to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Ok,

    /// Simple status line
    Status(String),

    Integer(i64),

    /// Binary-safe string
    Bulk(Bytes),

    /// Absent value
    Nil,

    Array(Vec<Reply>),

    /// Error line (message includes its `ERR`-style prefix)
    Error(String),

    /// Take over the connection; never written to the wire
    Hijack,
}

impl Reply {
    /// Create a bulk reply from anything byte-like
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(value.into())
    }

    pub fn is_hijack(&self) -> bool {
        matches!(self, Reply::Hijack)
    }
}
