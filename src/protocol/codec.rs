//! Protocol codec
//!
//! Encoding and decoding functions for the RESP2 wire protocol.

use std::io::{BufRead, Read, Write};

use bytes::Bytes;

use super::{Command, Reply};
use crate::error::{BitraftError, Result};

/// Maximum length of a header or inline command line (64 KB)
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum bulk string size (512 MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a request array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(command: &Command) -> Vec<u8> {
    let parts = command.to_parts();
    let mut message = Vec::new();
    message.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in &parts {
        encode_bulk(&mut message, part);
    }
    message
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs.
/// Returns `Ok(None)` on a clean EOF between commands.
pub fn read_command<R: BufRead>(reader: &mut R) -> Result<Option<Command>> {
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => return Ok(None),
        };

        let parts = if let Some(count) = line.strip_prefix(b"*") {
            let count = parse_len(count, "array")?;
            if count > MAX_ARRAY_LEN {
                return Err(BitraftError::Protocol(format!(
                    "array too large: {} elements (max {})",
                    count, MAX_ARRAY_LEN
                )));
            }

            let mut parts = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let header = read_line(reader)?.ok_or_else(unexpected_eof)?;
                let len = match header.strip_prefix(b"$") {
                    Some(len) => parse_len(len, "bulk")?,
                    None => {
                        return Err(BitraftError::Protocol(format!(
                            "expected '$', got '{}'",
                            String::from_utf8_lossy(&header)
                        )))
                    }
                };
                parts.push(read_bulk_body(reader, len)?);
            }
            parts
        } else {
            // Inline command
            line.split(|b| b.is_ascii_whitespace())
                .filter(|part| !part.is_empty())
                .map(Bytes::copy_from_slice)
                .collect()
        };

        // Blank lines and empty arrays are skipped
        if let Some(command) = Command::from_parts(parts) {
            return Ok(Some(command));
        }
    }
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command))?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Reply Encoding/Decoding
// =============================================================================

/// Encode a reply to bytes
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>> {
    let mut message = Vec::new();
    encode_reply_into(&mut message, reply)?;
    Ok(message)
}

fn encode_reply_into(out: &mut Vec<u8>, reply: &Reply) -> Result<()> {
    match reply {
        Reply::Ok => out.extend_from_slice(b"+OK\r\n"),
        Reply::Status(status) => {
            out.push(b'+');
            out.extend_from_slice(single_line(status).as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(message) => {
            out.push(b'-');
            out.extend_from_slice(single_line(message).as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
        Reply::Bulk(bytes) => encode_bulk(out, bytes),
        Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_reply_into(out, item)?;
            }
        }
        Reply::Hijack => {
            return Err(BitraftError::Protocol(
                "hijack replies cannot be encoded".to_string(),
            ))
        }
    }
    Ok(())
}

/// Write a reply to a stream
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> Result<()> {
    let bytes = encode_reply(reply)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete reply from a stream
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply> {
    let line = read_line(reader)?.ok_or_else(unexpected_eof)?;
    let (kind, rest) = match line.split_first() {
        Some((kind, rest)) => (*kind, rest),
        None => return Err(BitraftError::Protocol("empty reply line".to_string())),
    };

    match kind {
        b'+' => {
            let status = String::from_utf8_lossy(rest).into_owned();
            if status == "OK" {
                Ok(Reply::Ok)
            } else {
                Ok(Reply::Status(status))
            }
        }
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => {
            let text = std::str::from_utf8(rest)
                .map_err(|_| BitraftError::Protocol("non-utf8 integer".to_string()))?;
            let n = text
                .parse()
                .map_err(|_| BitraftError::Protocol(format!("invalid integer '{}'", text)))?;
            Ok(Reply::Integer(n))
        }
        b'$' => {
            if rest == b"-1" {
                return Ok(Reply::Nil);
            }
            let len = parse_len(rest, "bulk")?;
            Ok(Reply::Bulk(read_bulk_body(reader, len)?))
        }
        b'*' => {
            if rest == b"-1" {
                return Ok(Reply::Nil);
            }
            let count = parse_len(rest, "array")?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(read_reply(reader)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(BitraftError::Protocol(format!(
            "unknown reply type: 0x{:02x}",
            other
        ))),
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn encode_bulk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
    out.extend_from_slice(b"\r\n");
}

/// Status and error lines must not contain line breaks
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Read one CRLF (or LF) terminated line without its terminator
///
/// Returns `Ok(None)` on EOF before any byte was read.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LEN as u64 + 2)
        .read_until(b'\n', &mut line)?;

    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if read > MAX_LINE_LEN {
            return Err(BitraftError::Protocol(format!(
                "line too long (max {} bytes)",
                MAX_LINE_LEN
            )));
        }
        return Err(unexpected_eof());
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn read_bulk_body<R: Read>(reader: &mut R, len: usize) -> Result<Bytes> {
    if len > MAX_BULK_LEN {
        return Err(BitraftError::Protocol(format!(
            "bulk too large: {} bytes (max {})",
            len, MAX_BULK_LEN
        )));
    }

    let mut body = vec![0u8; len + 2];
    reader.read_exact(&mut body)?;
    if &body[len..] != b"\r\n" {
        return Err(BitraftError::Protocol(
            "bulk string not terminated by CRLF".to_string(),
        ));
    }
    body.truncate(len);
    Ok(Bytes::from(body))
}

fn parse_len(digits: &[u8], what: &str) -> Result<usize> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            BitraftError::Protocol(format!(
                "invalid {} length '{}'",
                what,
                String::from_utf8_lossy(digits)
            ))
        })
}

fn unexpected_eof() -> BitraftError {
    BitraftError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed mid-message",
    ))
}
