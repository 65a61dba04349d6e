//! Command Router
//!
//! Classifies commands by name, validates them and dispatches to handlers.
//!
//! ## Command Classes
//! - **Write**: mutates state; dispatched only from the log's apply path,
//!   after the entry has been committed and ordered
//! - **Read**: observes local state; dispatched directly, possibly stale
//!   relative to the leader
//! - **Intermediate**: takes over the client connection (returns
//!   `Reply::Hijack`)
//!
//! Validation (`check`) happens before a write is proposed and again at
//! dispatch, so an oversized or malformed command never reaches the log
//! or the store.

mod builtin;

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::Limits;
use crate::error::{BitraftError, Result};
use crate::protocol::{Command, Reply};
use crate::storage::Store;

/// Classification fixed at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Write,
    Read,
    Intermediate,
}

/// Accepted argument count, not counting the command name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

/// What an argument position holds, for size-limit checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Checked against `max_key_size`
    Key,
    /// Checked against `max_value_size`
    Value,
    /// Not size checked (e.g. a scan prefix)
    Pattern,
}

/// Strongly typed state handed to every handler
pub struct Context<'a> {
    pub store: &'a Store,
}

/// Handler signature
pub type Handler = fn(&Context<'_>, &[Bytes]) -> Result<Reply>;

/// A registered command
#[derive(Clone)]
pub struct CommandSpec {
    /// Lowercase name
    pub name: &'static str,
    pub class: CommandClass,
    pub arity: Arity,
    /// Kind of each argument position; the last kind repeats
    pub args: &'static [ArgKind],
    pub handler: Handler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("arity", &self.arity)
            .finish()
    }
}

impl CommandSpec {
    fn arg_kind(&self, index: usize) -> ArgKind {
        match self.args.get(index).or_else(|| self.args.last()) {
            Some(kind) => *kind,
            None => ArgKind::Pattern,
        }
    }
}

/// Name → command table
#[derive(Debug, Default)]
pub struct Router {
    commands: HashMap<String, CommandSpec>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with SET, GET, DEL, KEYS, DBSIZE and MONITOR registered
    pub fn with_builtins() -> Self {
        let mut router = Self::new();
        for spec in builtin::commands() {
            router.register(spec);
        }
        router
    }

    /// Register a command; a later registration under the same name wins
    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name.to_ascii_lowercase(), spec);
    }

    /// Look up a command by name (case-insensitive)
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(&name.to_ascii_lowercase())
    }

    /// Validate a command without executing it
    ///
    /// Rejects unknown names, wrong argument counts and keys/values over
    /// the configured limits.
    pub fn check(&self, command: &Command, limits: &Limits) -> Result<&CommandSpec> {
        let spec = self
            .lookup(&command.name)
            .ok_or_else(|| BitraftError::UnknownCommand(command.name.clone()))?;

        if !spec.arity.accepts(command.args.len()) {
            return Err(BitraftError::WrongArgCount(spec.name.to_string()));
        }

        for (index, arg) in command.args.iter().enumerate() {
            match spec.arg_kind(index) {
                ArgKind::Key if arg.len() > limits.max_key_size => {
                    return Err(BitraftError::KeyTooLarge {
                        size: arg.len(),
                        max: limits.max_key_size,
                    });
                }
                ArgKind::Value if arg.len() > limits.max_value_size => {
                    return Err(BitraftError::ValueTooLarge {
                        size: arg.len(),
                        max: limits.max_value_size,
                    });
                }
                _ => {}
            }
        }

        Ok(spec)
    }

    /// Validate and run a command
    ///
    /// Callers own the ordering contract: Write commands must only be
    /// dispatched from the apply path.
    pub fn dispatch(&self, ctx: &Context<'_>, command: &Command, limits: &Limits) -> Result<Reply> {
        let spec = self.check(command, limits)?;
        tracing::trace!(command = spec.name, args = command.args.len(), "dispatch");
        (spec.handler)(ctx, &command.args)
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
