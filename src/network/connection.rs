//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BitraftError, Result};
use crate::machine::{Consensus, Entry, StateMachine};
use crate::protocol::{read_command, write_reply, Command, Reply};
use crate::router::CommandClass;

use super::hijack::{HijackSession, Session, SessionState};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    machine: Arc<StateMachine>,

    /// Where write commands are proposed
    consensus: Arc<dyn Consensus>,

    session: Session,

    /// Longest outbound silence allowed on a hijacked session
    monitor_idle_timeout: Option<Duration>,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O over two handles of the same socket
    pub fn new(
        stream: TcpStream,
        machine: Arc<StateMachine>,
        consensus: Arc<dyn Consensus>,
    ) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            machine,
            consensus,
            session: Session::new(peer_addr),
            monitor_idle_timeout: None,
        })
    }

    /// Configure connection timeouts (0 = none)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64, monitor_idle_ms: u64) -> Result<()> {
        let to_duration = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));

        self.reader.get_ref().set_read_timeout(to_duration(read_ms))?;
        self.writer.get_ref().set_write_timeout(to_duration(write_ms))?;
        self.monitor_idle_timeout = to_duration(monitor_idle_ms);

        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends replies. Returns when the client
    /// disconnects, an error occurs, or a hijacked session ends.
    pub fn handle(mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr());

        loop {
            // Read next command
            let command = match read_command(&mut self.reader) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr());
                    return self.close();
                }
                Err(BitraftError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} went away: {}", self.peer_addr(), e);
                    return self.close();
                }
                Err(BitraftError::Io(ref e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    tracing::debug!("Read timeout for client {}", self.peer_addr());
                    return self.close();
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr(), e);
                    // Send error reply if possible
                    let _ = write_reply(&mut self.writer, &Reply::Error(e.reply_message()));
                    return Err(e);
                }
            };

            tracing::trace!("Received command from {}: {}", self.peer_addr(), command.name);

            let reply = match self.execute(&command) {
                Ok(Reply::Hijack) => return self.hijack(),
                Ok(reply) => reply,
                Err(e) => {
                    if e.is_rejection() {
                        tracing::debug!("Rejected command from {}: {}", self.peer_addr(), e);
                    } else {
                        tracing::warn!("Command '{}' from {} failed: {}", command.name, self.peer_addr(), e);
                    }
                    Reply::Error(e.reply_message())
                }
            };

            if let Err(e) = write_reply(&mut self.writer, &reply) {
                if let BitraftError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            "Client {} disconnected before reply could be sent: {}",
                            self.peer_addr(),
                            e
                        );
                        return self.close();
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr(), e);
                return Err(e);
            }
        }
    }

    /// Route a command by class
    ///
    /// Validation happens first, so rejected writes never reach the log.
    fn execute(&self, command: &Command) -> Result<Reply> {
        match self.machine.classify(command)? {
            CommandClass::Write => self
                .consensus
                .propose(Entry::new(command.clone(), self.peer_addr())),
            CommandClass::Read | CommandClass::Intermediate => {
                self.machine.query(command, self.peer_addr())
            }
        }
    }

    /// Detach from the request loop and stream monitor events
    fn hijack(mut self) -> Result<()> {
        self.session.transition(SessionState::Hijacking)?;
        let machine = Arc::clone(&self.machine);
        let session = HijackSession::new(
            self.session,
            self.reader,
            self.writer,
            self.monitor_idle_timeout,
        )?;
        session.run(machine.monitor())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.session.transition(SessionState::Closed)
    }

    /// Another handle to the underlying socket
    pub fn stream_handle(&self) -> Result<TcpStream> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        self.session.peer_addr()
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}
