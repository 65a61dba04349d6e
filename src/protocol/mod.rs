//! Protocol Module
//!
//! Text-based wire protocol (RESP2) for client-server communication.
//!
//! ## Request Format
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<arg bytes>\r\n      (repeated argc times, arg 0 = command name)
//! ```
//! Inline commands (`SET foo bar\r\n`) are accepted as well.
//!
//! ## Reply Format
//! - `+OK\r\n`                       simple string
//! - `-ERR message\r\n`              error
//! - `:42\r\n`                       integer
//! - `$<len>\r\n<bytes>\r\n`         bulk string (`$-1\r\n` = nil)
//! - `*<n>\r\n<reply>...`            array

mod command;
mod reply;
mod codec;

pub use command::Command;
pub use reply::Reply;
pub use codec::{
    encode_command, encode_reply, read_command, read_reply, write_command, write_reply,
    MAX_ARRAY_LEN, MAX_BULK_LEN, MAX_LINE_LEN,
};
