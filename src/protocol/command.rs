//! Command definitions
//!
//! A command as received from a client or carried through the log.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Lowercased command name
    pub name: String,

    /// Arguments after the name
    pub args: Vec<Bytes>,
}

impl Command {
    /// Build a command; the name is matched case-insensitively
    pub fn new(name: &str, args: Vec<Bytes>) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            args,
        }
    }

    /// Build a command from raw wire parts (part 0 is the name)
    ///
    /// Returns `None` for an empty part list.
    pub fn from_parts(mut parts: Vec<Bytes>) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        let args = parts.split_off(1);
        let name = String::from_utf8_lossy(&parts[0]);
        Some(Self::new(&name, args))
    }

    /// Name followed by the arguments, as sent on the wire
    pub fn to_parts(&self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(Bytes::from(self.name.clone()));
        parts.extend(self.args.iter().cloned());
        parts
    }
}
