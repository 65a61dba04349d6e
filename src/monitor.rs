//! Monitor Broadcaster
//!
//! Fans every executed command out to subscribed observers.
//!
//! ## Delivery
//! - Each observer owns a bounded queue (crossbeam channel)
//! - `publish` never blocks: when a queue is full the oldest pending event
//!   is dropped to make room, keeping monitor output live
//! - Stopping an observer drops its sender, which ends the consumer's
//!   event iteration

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;

/// One executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// When the command finished executing
    pub timestamp: SystemTime,

    /// Address of the client that issued it
    pub addr: String,

    /// Command name followed by its arguments
    pub args: Vec<Bytes>,
}

impl Event {
    /// Event stamped with the current time
    pub fn now(addr: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            addr: addr.into(),
            args,
        }
    }

    /// Render the monitor line
    ///
    /// `<epoch seconds, 6 decimals> [0 <addr>] "arg0" "arg1" ...`
    pub fn to_line(&self) -> String {
        let since_epoch = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut line = format!(
            "{}.{:06} [0 {}]",
            since_epoch.as_secs(),
            since_epoch.subsec_micros(),
            self.addr
        );
        for arg in &self.args {
            line.push_str(&format!(" \"{}\"", arg.escape_ascii()));
        }
        line
    }
}

/// Per-observer delivery slot held by the hub
struct Slot {
    tx: Sender<Event>,
    /// Receiver clone used only to evict the oldest event on overflow
    evict: Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

struct Hub {
    observers: Mutex<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Hub {
    fn remove(&self, id: u64) -> bool {
        self.observers.lock().remove(&id).is_some()
    }
}

/// Publish/subscribe hub for command-execution events
#[derive(Clone)]
pub struct Monitor {
    hub: Arc<Hub>,
}

impl Monitor {
    /// Create a monitor whose observers each queue up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                observers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe a new observer
    ///
    /// It sees only events published after this call.
    pub fn subscribe(&self) -> Observer {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(self.hub.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        self.hub.observers.lock().insert(
            id,
            Slot {
                tx,
                evict: rx.clone(),
                dropped: Arc::clone(&dropped),
            },
        );
        tracing::debug!(observer = id, "observer subscribed");

        Observer {
            id,
            rx,
            dropped,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Deliver an event to every live observer without blocking
    pub fn publish(&self, event: Event) {
        let observers = self.hub.observers.lock();
        if observers.is_empty() {
            return;
        }

        for (id, slot) in observers.iter() {
            let mut pending = event.clone();
            loop {
                match slot.tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        // Drop-oldest: evict one stale event, then retry
                        if slot.evict.try_recv().is_ok() {
                            slot.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        tracing::trace!(observer = *id, "observer gone, skipping");
                        break;
                    }
                }
            }
        }
    }

    /// Number of live observers
    pub fn observer_count(&self) -> usize {
        self.hub.observers.lock().len()
    }

    /// Stop every observer (server shutdown)
    pub fn stop_all(&self) {
        let mut observers = self.hub.observers.lock();
        let count = observers.len();
        observers.clear();
        if count > 0 {
            tracing::debug!(observers = count, "stopped all observers");
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("observers", &self.observer_count())
            .field("capacity", &self.hub.capacity)
            .finish()
    }
}

/// A subscription bound to one consumer
///
/// Dropping the observer stops it.
pub struct Observer {
    id: u64,
    rx: Receiver<Event>,
    dropped: Arc<AtomicU64>,
    hub: Arc<Hub>,
}

impl Observer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocking iterator over events; ends once the observer is stopped
    /// and the remaining queued events have been consumed
    pub fn events(&self) -> channel::Iter<'_, Event> {
        self.rx.iter()
    }

    /// Next queued event without blocking
    ///
    /// `Err(TryRecvError::Disconnected)` means the observer was stopped.
    pub fn try_next(&self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Events discarded because this observer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Handle that can stop this observer from another thread
    pub fn handle(&self) -> ObserverHandle {
        ObserverHandle {
            id: self.id,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Unsubscribe; a consumer blocked in `events()` wakes up
    pub fn stop(&self) {
        if self.hub.remove(self.id) {
            tracing::debug!(observer = self.id, "observer stopped");
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable stop handle for an observer
#[derive(Clone)]
pub struct ObserverHandle {
    id: u64,
    hub: Arc<Hub>,
}

impl ObserverHandle {
    pub fn stop(&self) {
        if self.hub.remove(self.id) {
            tracing::debug!(observer = self.id, "observer stopped");
        }
    }

    /// Whether the observer is still subscribed
    pub fn is_active(&self) -> bool {
        self.hub.observers.lock().contains_key(&self.id)
    }
}
