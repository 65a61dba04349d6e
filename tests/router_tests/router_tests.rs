//! Tests for the Command Router
//!
//! These tests verify:
//! - Classification of the built-in commands
//! - Rejection of unknown commands, wrong arity and oversized arguments
//! - Handler semantics for SET/GET/DEL/KEYS/DBSIZE/MONITOR

use bitraft::config::{Limits, StoreOptions, SyncPolicy};
use bitraft::protocol::{Command, Reply};
use bitraft::router::{Arity, ArgKind, CommandClass, CommandSpec, Context, Router};
use bitraft::{BitraftError, Result, Store};
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_router() -> (TempDir, Store, Router) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(
        &temp_dir.path().join("db"),
        StoreOptions {
            max_datafile_size: 1 << 20,
            sync_policy: SyncPolicy::Never,
        },
    )
    .unwrap();
    (temp_dir, store, Router::with_builtins())
}

fn limits() -> Limits {
    Limits {
        max_key_size: 8,
        max_value_size: 16,
    }
}

fn cmd(name: &str, args: &[&str]) -> Command {
    Command::new(
        name,
        args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
    )
}

fn run(router: &Router, store: &Store, command: Command) -> Result<Reply> {
    let ctx = Context { store };
    router.dispatch(&ctx, &command, &limits())
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_builtin_classes() {
    let router = Router::with_builtins();

    let class = |name: &str| router.lookup(name).unwrap().class;
    assert_eq!(class("set"), CommandClass::Write);
    assert_eq!(class("del"), CommandClass::Write);
    assert_eq!(class("get"), CommandClass::Read);
    assert_eq!(class("keys"), CommandClass::Read);
    assert_eq!(class("dbsize"), CommandClass::Read);
    assert_eq!(class("monitor"), CommandClass::Intermediate);
    assert_eq!(router.len(), 6);
}

#[test]
fn test_lookup_is_case_insensitive() {
    let router = Router::with_builtins();
    assert_eq!(router.lookup("SET").unwrap().name, "set");
    assert_eq!(router.lookup("DbSize").unwrap().name, "dbsize");
}

#[test]
fn test_register_custom_command() {
    fn cmd_ping(_ctx: &Context<'_>, _args: &[Bytes]) -> Result<Reply> {
        Ok(Reply::Status("PONG".to_string()))
    }

    let (_temp, store, mut router) = setup_router();
    router.register(CommandSpec {
        name: "ping",
        class: CommandClass::Read,
        arity: Arity::Exact(0),
        args: &[],
        handler: cmd_ping,
    });

    assert_eq!(
        run(&router, &store, cmd("PING", &[])).unwrap(),
        Reply::Status("PONG".to_string())
    );
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_unknown_command() {
    let (_temp, store, router) = setup_router();

    let err = run(&router, &store, cmd("flushall", &[])).unwrap_err();
    assert!(matches!(err, BitraftError::UnknownCommand(ref name) if name == "flushall"));
    assert_eq!(err.reply_message(), "ERR unknown command 'flushall'");
}

#[test]
fn test_wrong_arity() {
    let (_temp, store, router) = setup_router();

    for command in [
        cmd("set", &["k"]),
        cmd("set", &["k", "v", "extra"]),
        cmd("get", &[]),
        cmd("del", &[]),
        cmd("dbsize", &["x"]),
        cmd("monitor", &["x"]),
    ] {
        let err = run(&router, &store, command).unwrap_err();
        assert!(matches!(err, BitraftError::WrongArgCount(_)), "got {:?}", err);
    }

    assert_eq!(store.len(), 0);
}

#[test]
fn test_wrong_arity_message() {
    let (_temp, store, router) = setup_router();

    let err = run(&router, &store, cmd("GET", &[])).unwrap_err();
    assert_eq!(err.reply_message(), "ERR wrong number of arguments for 'get' command");
}

#[test]
fn test_key_too_large_rejected_before_write() {
    let (_temp, store, router) = setup_router();

    let err = run(&router, &store, cmd("set", &["123456789", "v"])).unwrap_err();
    assert!(matches!(err, BitraftError::KeyTooLarge { size: 9, max: 8 }));
    assert!(store.is_empty());
}

#[test]
fn test_value_too_large_rejected_before_write() {
    let (_temp, store, router) = setup_router();

    let err = run(&router, &store, cmd("set", &["k", "0123456789abcdefX"])).unwrap_err();
    assert!(matches!(err, BitraftError::ValueTooLarge { size: 17, max: 16 }));
    assert!(store.is_empty());
}

#[test]
fn test_limits_are_inclusive() {
    let (_temp, store, router) = setup_router();

    run(&router, &store, cmd("set", &["12345678", "0123456789abcdef"])).unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn test_every_del_key_is_size_checked() {
    let (_temp, store, router) = setup_router();
    store.put(b"a", b"1").unwrap();

    let err = run(&router, &store, cmd("del", &["a", "waytoolongkey"])).unwrap_err();
    assert!(matches!(err, BitraftError::KeyTooLarge { .. }));
    // Nothing was removed
    assert_eq!(store.len(), 1);
}

#[test]
fn test_keys_pattern_not_size_checked() {
    let (_temp, store, router) = setup_router();

    let reply = run(&router, &store, cmd("keys", &["a-very-long-prefix"])).unwrap();
    assert_eq!(reply, Reply::Array(vec![]));
}

// =============================================================================
// Handlers
// =============================================================================

#[test]
fn test_set_get_del_scenario() {
    let (_temp, store, router) = setup_router();

    assert_eq!(run(&router, &store, cmd("SET", &["a", "1"])).unwrap(), Reply::Ok);
    assert_eq!(
        run(&router, &store, cmd("GET", &["a"])).unwrap(),
        Reply::Bulk(Bytes::from_static(b"1"))
    );
    assert_eq!(run(&router, &store, cmd("DEL", &["a"])).unwrap(), Reply::Integer(1));
    assert_eq!(run(&router, &store, cmd("GET", &["a"])).unwrap(), Reply::Nil);
    assert_eq!(run(&router, &store, cmd("DBSIZE", &[])).unwrap(), Reply::Integer(0));
}

#[test]
fn test_del_counts_only_existing_keys() {
    let (_temp, store, router) = setup_router();

    run(&router, &store, cmd("set", &["a", "1"])).unwrap();
    run(&router, &store, cmd("set", &["b", "2"])).unwrap();

    assert_eq!(run(&router, &store, cmd("del", &["missing"])).unwrap(), Reply::Integer(0));
    assert_eq!(
        run(&router, &store, cmd("del", &["a", "b", "c", "a"])).unwrap(),
        Reply::Integer(2)
    );
    assert!(store.is_empty());
}

#[test]
fn test_keys_prefix_sorted() {
    let (_temp, store, router) = setup_router();

    for key in ["b2", "a1", "b1", "c"] {
        run(&router, &store, cmd("set", &[key, "x"])).unwrap();
    }

    let bulk = |s: &'static str| Reply::Bulk(Bytes::from_static(s.as_bytes()));
    assert_eq!(
        run(&router, &store, cmd("keys", &["b"])).unwrap(),
        Reply::Array(vec![bulk("b1"), bulk("b2")])
    );
    assert_eq!(
        run(&router, &store, cmd("keys", &[""])).unwrap(),
        Reply::Array(vec![bulk("a1"), bulk("b1"), bulk("b2"), bulk("c")])
    );
}

#[test]
fn test_monitor_returns_hijack() {
    let (_temp, store, router) = setup_router();

    let reply = run(&router, &store, cmd("monitor", &[])).unwrap();
    assert!(reply.is_hijack());
}

#[test]
fn test_arg_kind_table() {
    let router = Router::with_builtins();
    assert_eq!(router.lookup("set").unwrap().args, &[ArgKind::Key, ArgKind::Value]);
    assert_eq!(router.lookup("del").unwrap().arity, Arity::AtLeast(1));
}
