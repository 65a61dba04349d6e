//! TCP Server
//!
//! Accepts connections and runs each on its own thread.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::machine::{Consensus, StateMachine};
use crate::protocol::{write_reply, Reply};

use super::connection::Connection;

/// How often the accept loop checks for shutdown when idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Open connections, kept so shutdown can close them
type ConnectionTable = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// TCP server for bitraft
pub struct Server {
    config: Config,
    listener: TcpListener,
    machine: Arc<StateMachine>,
    consensus: Arc<dyn Consensus>,
    shutdown: ShutdownHandle,
    connections: ConnectionTable,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    /// Bind the configured address
    pub fn bind(
        config: Config,
        machine: Arc<StateMachine>,
        consensus: Arc<dyn Consensus>,
    ) -> Result<Self> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            machine,
            consensus,
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
            },
            connections: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops `run` from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of open client connections
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until shut down (blocking)
    ///
    /// On shutdown every observer is stopped, every open connection is
    /// closed and connection threads are joined before returning.
    pub fn run(&self) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Some(worker) = self.spawn_connection(stream, peer) {
                        workers.push(worker);
                    }
                    workers.retain(|w| !w.is_finished());
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!(connections = self.connection_count(), "Server shutting down");

        // Hijacked sessions end when their observers stop
        self.machine.monitor().stop_all();
        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("connection thread panicked");
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> Option<JoinHandle<()>> {
        // Accepted sockets inherit non-blocking mode on some platforms
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Failed to configure connection from {}: {}", peer, e);
            return None;
        }

        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            tracing::warn!("Rejecting {}: max connections ({}) reached", peer, self.config.max_connections);
            let mut stream = stream;
            let _ = write_reply(
                &mut stream,
                &Reply::Error("ERR max number of clients reached".to_string()),
            );
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut connection = match Connection::new(stream, Arc::clone(&self.machine), Arc::clone(&self.consensus)) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                return None;
            }
        };

        if let Err(e) = connection.set_timeouts(
            self.config.read_timeout_ms,
            self.config.write_timeout_ms,
            self.config.monitor_idle_timeout_ms,
        ) {
            tracing::warn!("Failed to set timeouts for {}: {}", peer, e);
            return None;
        }

        // Registered so shutdown can unblock the connection thread
        match connection.stream_handle() {
            Ok(handle) => {
                self.connections.lock().insert(id, handle);
            }
            Err(e) => {
                tracing::warn!("Failed to register connection from {}: {}", peer, e);
                return None;
            }
        }

        let guard = ConnectionGuard {
            id,
            active: Arc::clone(&self.active),
            connections: Arc::clone(&self.connections),
        };
        guard.active.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", id))
            .spawn(move || {
                let _guard = guard;
                if let Err(e) = connection.handle() {
                    tracing::debug!("Connection {} ended with error: {}", peer, e);
                }
            });

        match spawned {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::warn!("Failed to spawn thread for {}: {}", peer, e);
                None
            }
        }
    }
}

/// Decrements the connection count and unregisters on drop
struct ConnectionGuard {
    id: u64,
    active: Arc<AtomicUsize>,
    connections: ConnectionTable,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.lock().remove(&self.id);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloneable handle that stops a running server
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once `shutdown` has been called on any clone
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
