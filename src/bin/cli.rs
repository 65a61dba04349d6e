//! bitraft CLI Client
//!
//! Command-line interface for interacting with a bitraft node.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::TcpStream;

use bitraft::protocol::{read_reply, write_command, Command, Reply};
use bitraft::{BitraftError, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};

/// bitraft CLI
#[derive(Parser, Debug)]
#[command(name = "bitraft-cli")]
#[command(about = "CLI for the bitraft key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4920")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete one or more keys
    Del {
        /// The keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List keys starting with a prefix
    Keys {
        /// Key prefix ("" for all keys)
        #[arg(default_value = "")]
        pattern: String,
    },

    /// Count keys
    Dbsize,

    /// Stream every executed command until interrupted
    Monitor,
}

impl Commands {
    fn to_command(&self) -> Command {
        let bytes = |s: &String| Bytes::from(s.clone().into_bytes());
        match self {
            Commands::Get { key } => Command::new("get", vec![bytes(key)]),
            Commands::Set { key, value } => Command::new("set", vec![bytes(key), bytes(value)]),
            Commands::Del { keys } => Command::new("del", keys.iter().map(bytes).collect()),
            Commands::Keys { pattern } => Command::new("keys", vec![bytes(pattern)]),
            Commands::Dbsize => Command::new("dbsize", Vec::new()),
            Commands::Monitor => Command::new("monitor", Vec::new()),
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("(error) {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let stream = TcpStream::connect(&args.server)?;
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    write_command(&mut writer, &args.command.to_command())?;
    let reply = read_reply(&mut reader)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_reply(&mut out, &reply, 0)?;

    if let (Commands::Monitor, Reply::Ok) = (&args.command, &reply) {
        loop {
            match read_reply(&mut reader) {
                Ok(event) => {
                    print_reply(&mut out, &event, 0)?;
                    out.flush()?;
                }
                // Server closed the stream
                Err(BitraftError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }
    }

    if let Reply::Error(_) = reply {
        std::process::exit(1);
    }
    Ok(())
}

/// Print a reply the way redis-cli does
fn print_reply<W: Write>(out: &mut W, reply: &Reply, depth: usize) -> Result<()> {
    match reply {
        Reply::Ok => writeln!(out, "OK")?,
        Reply::Status(status) => writeln!(out, "{}", status)?,
        Reply::Integer(n) => writeln!(out, "(integer) {}", n)?,
        Reply::Bulk(bytes) => writeln!(out, "\"{}\"", bytes.escape_ascii())?,
        Reply::Nil => writeln!(out, "(nil)")?,
        Reply::Error(message) => writeln!(out, "(error) {}", message)?,
        Reply::Array(items) if items.is_empty() => writeln!(out, "(empty array)")?,
        Reply::Array(items) => {
            let indent = " ".repeat(depth * 3);
            for (i, item) in items.iter().enumerate() {
                let prefix = if i == 0 { String::new() } else { indent.clone() };
                write!(out, "{}{}) ", prefix, i + 1)?;
                print_reply(out, item, depth + 1)?;
            }
        }
        Reply::Hijack => {}
    }
    Ok(())
}
