//! Codec Tests
//!
//! Tests for RESP command parsing and reply encoding/decoding.

use std::io::Cursor;

use bitraft::protocol::{
    encode_command, encode_reply, read_command, read_reply, write_command, write_reply, Command,
    Reply,
};
use bitraft::BitraftError;
use bytes::Bytes;

fn parts(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
}

// =============================================================================
// Command Parsing Tests
// =============================================================================

#[test]
fn test_read_array_command() {
    let mut input = Cursor::new(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n".to_vec());

    let command = read_command(&mut input).unwrap().unwrap();

    assert_eq!(command.name, "set");
    assert_eq!(command.args, parts(&["key", "value"]));
}

#[test]
fn test_read_inline_command() {
    let mut input = Cursor::new(b"get   mykey\r\n".to_vec());

    let command = read_command(&mut input).unwrap().unwrap();

    assert_eq!(command, Command::new("get", parts(&["mykey"])));
}

#[test]
fn test_binary_safe_bulk() {
    let mut input = Cursor::new(b"*2\r\n$3\r\nget\r\n$4\r\na\r\nb\r\n".to_vec());

    let command = read_command(&mut input).unwrap().unwrap();

    assert_eq!(command.args, vec![Bytes::from_static(b"a\r\nb")]);
}

#[test]
fn test_blank_lines_are_skipped() {
    let mut input = Cursor::new(b"\r\n\r\n*0\r\nDBSIZE\r\n".to_vec());

    let command = read_command(&mut input).unwrap().unwrap();

    assert_eq!(command.name, "dbsize");
    assert!(command.args.is_empty());
}

#[test]
fn test_pipelined_commands() {
    let mut input = Cursor::new(b"*1\r\n$6\r\ndbsize\r\nget a\r\n".to_vec());

    assert_eq!(read_command(&mut input).unwrap().unwrap().name, "dbsize");
    assert_eq!(read_command(&mut input).unwrap().unwrap().name, "get");
    assert!(read_command(&mut input).unwrap().is_none());
}

#[test]
fn test_clean_eof() {
    let mut input = Cursor::new(Vec::new());
    assert!(read_command(&mut input).unwrap().is_none());
}

#[test]
fn test_truncated_bulk_is_error() {
    let mut input = Cursor::new(b"*2\r\n$3\r\nget\r\n$10\r\nshort\r\n".to_vec());
    assert!(read_command(&mut input).is_err());
}

#[test]
fn test_bad_bulk_header_is_protocol_error() {
    let mut input = Cursor::new(b"*1\r\n:3\r\n".to_vec());
    assert!(matches!(read_command(&mut input), Err(BitraftError::Protocol(_))));
}

#[test]
fn test_bad_length_is_protocol_error() {
    let mut input = Cursor::new(b"*x\r\n".to_vec());
    assert!(matches!(read_command(&mut input), Err(BitraftError::Protocol(_))));
}

#[test]
fn test_write_then_read_command() {
    let command = Command::new("del", parts(&["a", "b", ""]));
    let mut buf = Vec::new();
    write_command(&mut buf, &command).unwrap();

    assert_eq!(buf, encode_command(&command));
    assert_eq!(read_command(&mut Cursor::new(buf)).unwrap(), Some(command));
}

// =============================================================================
// Reply Encoding Tests
// =============================================================================

#[test]
fn test_encode_simple_replies() {
    assert_eq!(encode_reply(&Reply::Ok).unwrap(), b"+OK\r\n");
    assert_eq!(encode_reply(&Reply::Integer(-3)).unwrap(), b":-3\r\n");
    assert_eq!(encode_reply(&Reply::Nil).unwrap(), b"$-1\r\n");
    assert_eq!(
        encode_reply(&Reply::Error("ERR boom".to_string())).unwrap(),
        b"-ERR boom\r\n"
    );
}

#[test]
fn test_encode_bulk_and_array() {
    let reply = Reply::Array(vec![Reply::bulk("a"), Reply::bulk(Bytes::new())]);
    assert_eq!(encode_reply(&reply).unwrap(), b"*2\r\n$1\r\na\r\n$0\r\n\r\n");
    assert_eq!(encode_reply(&Reply::Array(vec![])).unwrap(), b"*0\r\n");
}

#[test]
fn test_status_line_breaks_are_flattened() {
    let encoded = encode_reply(&Reply::Status("a\r\nb".to_string())).unwrap();
    assert_eq!(encoded, b"+a  b\r\n");
}

#[test]
fn test_hijack_cannot_be_encoded() {
    assert!(encode_reply(&Reply::Hijack).is_err());
}

// =============================================================================
// Reply Decoding Tests
// =============================================================================

#[test]
fn test_write_then_read_replies() {
    let replies = vec![
        Reply::Ok,
        Reply::Status("1.000000 [0 x] \"get\"".to_string()),
        Reply::Integer(42),
        Reply::bulk("binary\r\nsafe"),
        Reply::Nil,
        Reply::Array(vec![Reply::bulk("k1"), Reply::bulk("k2")]),
        Reply::Error("ERR unknown command 'x'".to_string()),
    ];

    let mut buf = Vec::new();
    for reply in &replies {
        write_reply(&mut buf, reply).unwrap();
    }

    let mut input = Cursor::new(buf);
    for expected in replies {
        assert_eq!(read_reply(&mut input).unwrap(), expected);
    }
}

#[test]
fn test_read_reply_eof_is_error() {
    let mut input = Cursor::new(Vec::new());
    assert!(read_reply(&mut input).is_err());
}
