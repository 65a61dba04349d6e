//! Hijack Session Manager
//!
//! A connection pulled out of the request/response loop to stream monitor
//! events.
//!
//! ## Lifecycle
//! ```text
//! Attached ──▶ Hijacking ──▶ Hijacked ──▶ Closed
//!    │             │                        ▲
//!    └─────────────┴────────────────────────┘
//! ```
//!
//! While Hijacked two activities share the socket:
//! - inbound drain (own thread): data, EOF or a read error ends the session
//! - outbound forward (session thread): one line per event, flushed
//!
//! The idle timeout measures outbound silence. A monitor that keeps
//! receiving events never times out; the drain re-arms its read until no
//! event has been written for the whole window.
//!
//! Teardown order: stop the observer (unblocks the forward loop), shut the
//! socket down (unblocks the drain read), join the drain thread.

use std::io::{BufReader, BufWriter, ErrorKind, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{BitraftError, Result};
use crate::monitor::{Monitor, Observer, ObserverHandle};
use crate::protocol::{write_reply, Reply};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Normal request/response
    Attached,
    /// A handler asked to take the connection over
    Hijacking,
    /// Streaming monitor events; terminal until closed
    Hijacked,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Attached, Hijacking)
                | (Hijacking, Hijacked)
                | (Attached, Closed)
                | (Hijacking, Closed)
                | (Hijacked, Closed)
        )
    }
}

/// Tracks the state of one client connection
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    peer_addr: String,
}

impl Session {
    pub fn new(peer_addr: impl Into<String>) -> Self {
        Self {
            state: SessionState::Attached,
            peer_addr: peer_addr.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BitraftError::Protocol(format!(
                "illegal session transition {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::debug!(peer = %self.peer_addr, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }
}

/// Why a hijacked session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed or reset the connection
    Disconnected,
    /// Client sent data after MONITOR
    UnexpectedInput,
    /// No event written within the idle timeout
    IdleTimeout,
    /// Observer stopped elsewhere (e.g. server shutdown)
    Stopped,
    /// Writing an event failed
    WriteFailed,
}

/// A connection streaming monitor events
pub struct HijackSession {
    session: Session,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    idle_timeout: Option<Duration>,
}

impl HijackSession {
    /// Take over a connection whose session is in `Hijacking`
    pub fn new(
        session: Session,
        reader: BufReader<TcpStream>,
        writer: BufWriter<TcpStream>,
        idle_timeout: Option<Duration>,
    ) -> Result<Self> {
        if session.state() != SessionState::Hijacking {
            return Err(BitraftError::Protocol(format!(
                "cannot hijack a session in state {:?}",
                session.state()
            )));
        }
        Ok(Self {
            session,
            reader,
            writer,
            idle_timeout,
        })
    }

    /// Stream events until the client goes away or the observer is stopped
    ///
    /// Blocks the calling thread; always ends in `Closed`.
    pub fn run(mut self, monitor: &Monitor) -> Result<CloseReason> {
        let observer = monitor.subscribe();
        self.session.transition(SessionState::Hijacked)?;
        tracing::info!(peer = %self.session.peer_addr(), observer = observer.id(), "hijack opened");

        let reason = self.stream(&observer);

        // Teardown: observer first, then the socket
        observer.stop();
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        self.session.transition(SessionState::Closed)?;

        tracing::info!(
            peer = %self.session.peer_addr(),
            reason = ?reason,
            dropped = observer.dropped(),
            "hijack closed"
        );
        Ok(reason)
    }

    fn stream(&mut self, observer: &Observer) -> CloseReason {
        if let Err(e) = write_reply(&mut self.writer, &Reply::Ok) {
            tracing::debug!(peer = %self.session.peer_addr(), error = %e, "failed to acknowledge monitor");
            return CloseReason::WriteFailed;
        }

        // Bytes pipelined behind MONITOR count as unexpected input
        if !self.reader.buffer().is_empty() {
            return CloseReason::UnexpectedInput;
        }

        let stream = match self.reader.get_ref().try_clone() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer = %self.session.peer_addr(), error = %e, "failed to clone hijacked stream");
                return CloseReason::WriteFailed;
            }
        };
        if let Err(e) = stream.set_read_timeout(self.idle_timeout) {
            tracing::warn!(peer = %self.session.peer_addr(), error = %e, "failed to set idle timeout");
        }

        let last_write = Arc::new(Mutex::new(Instant::now()));
        let handle = observer.handle();
        let idle_timeout = self.idle_timeout;
        let drain_last_write = Arc::clone(&last_write);
        let drain = match thread::Builder::new()
            .name(format!("monitor-drain-{}", observer.id()))
            .spawn(move || drain(stream, handle, idle_timeout, drain_last_write))
        {
            Ok(drain) => drain,
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn drain thread");
                return CloseReason::WriteFailed;
            }
        };

        let mut reason = CloseReason::Stopped;
        for event in observer.events() {
            if let Err(e) = write_reply(&mut self.writer, &Reply::Status(event.to_line())) {
                tracing::debug!(peer = %self.session.peer_addr(), error = %e, "monitor write failed");
                reason = CloseReason::WriteFailed;
                break;
            }
            *last_write.lock() = Instant::now();
        }

        // Forward loop is done; make sure the drain side is too
        observer.stop();
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        match drain.join() {
            Ok(Some(drain_reason)) if reason == CloseReason::Stopped => drain_reason,
            Ok(_) => reason,
            Err(_) => {
                tracing::error!("drain thread panicked");
                reason
            }
        }
    }
}

/// Inbound drain: wait for anything at all from the client, then stop the
/// observer
///
/// A read timeout only ends the session once `idle_timeout` has passed
/// since `last_write`. Returns the reason if the drain side ended the
/// session, `None` if the observer had already been stopped.
fn drain(
    mut stream: TcpStream,
    handle: ObserverHandle,
    idle_timeout: Option<Duration>,
    last_write: Arc<Mutex<Instant>>,
) -> Option<CloseReason> {
    let mut buf = [0u8; 512];
    let reason = loop {
        match stream.read(&mut buf) {
            Ok(0) => break CloseReason::Disconnected,
            Ok(_) => break CloseReason::UnexpectedInput,
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                let Some(timeout) = idle_timeout else {
                    continue;
                };
                if !handle.is_active() {
                    return None;
                }
                let idle = last_write.lock().elapsed();
                if idle >= timeout {
                    break CloseReason::IdleTimeout;
                }
                // Wait out the rest of the window since the last event
                if stream.set_read_timeout(Some(timeout - idle)).is_err() {
                    break CloseReason::Disconnected;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break CloseReason::Disconnected,
        }
    };

    if handle.is_active() {
        handle.stop();
        Some(reason)
    } else {
        None
    }
}
