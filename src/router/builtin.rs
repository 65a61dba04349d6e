//! Built-in commands

use bytes::Bytes;

use super::{Arity, ArgKind, CommandClass, CommandSpec, Context};
use crate::error::Result;
use crate::protocol::Reply;

pub(super) fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "set",
            class: CommandClass::Write,
            arity: Arity::Exact(2),
            args: &[ArgKind::Key, ArgKind::Value],
            handler: cmd_set,
        },
        CommandSpec {
            name: "del",
            class: CommandClass::Write,
            arity: Arity::AtLeast(1),
            args: &[ArgKind::Key],
            handler: cmd_del,
        },
        CommandSpec {
            name: "get",
            class: CommandClass::Read,
            arity: Arity::Exact(1),
            args: &[ArgKind::Key],
            handler: cmd_get,
        },
        CommandSpec {
            name: "keys",
            class: CommandClass::Read,
            arity: Arity::Exact(1),
            args: &[ArgKind::Pattern],
            handler: cmd_keys,
        },
        CommandSpec {
            name: "dbsize",
            class: CommandClass::Read,
            arity: Arity::Exact(0),
            args: &[],
            handler: cmd_dbsize,
        },
        CommandSpec {
            name: "monitor",
            class: CommandClass::Intermediate,
            arity: Arity::Exact(0),
            args: &[],
            handler: cmd_monitor,
        },
    ]
}

/// SET key value
fn cmd_set(ctx: &Context<'_>, args: &[Bytes]) -> Result<Reply> {
    ctx.store.put(&args[0], &args[1])?;
    Ok(Reply::Ok)
}

/// DEL key [key ...]
/// Replies with the number of keys that existed and were removed.
fn cmd_del(ctx: &Context<'_>, args: &[Bytes]) -> Result<Reply> {
    let mut removed = 0i64;
    for key in args {
        if ctx.store.delete(key)? {
            removed += 1;
        }
    }
    Ok(Reply::Integer(removed))
}

/// GET key
fn cmd_get(ctx: &Context<'_>, args: &[Bytes]) -> Result<Reply> {
    Ok(match ctx.store.get(&args[0]) {
        Some(value) => Reply::Bulk(value),
        None => Reply::Nil,
    })
}

/// KEYS prefix
fn cmd_keys(ctx: &Context<'_>, args: &[Bytes]) -> Result<Reply> {
    let mut keys = Vec::new();
    ctx.store.scan(&args[0], |key| {
        keys.push(Reply::Bulk(Bytes::copy_from_slice(key)));
        Ok(())
    })?;
    Ok(Reply::Array(keys))
}

/// DBSIZE
fn cmd_dbsize(ctx: &Context<'_>, _args: &[Bytes]) -> Result<Reply> {
    Ok(Reply::Integer(ctx.store.len() as i64))
}

/// MONITOR
/// Streams every executed command; the connection is taken over.
fn cmd_monitor(_ctx: &Context<'_>, _args: &[Bytes]) -> Result<Reply> {
    Ok(Reply::Hijack)
}
