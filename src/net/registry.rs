//! Connection registry and aggregate statistics
//!
//! `RegistryStats` is injected into every connection through its
//! `ConnectionEnv`; there is no process-global counter. The registry keeps
//! weak references only, so dropping a `Connection` is never delayed by
//! the registry.

use super::connection::{Connection, ConnectionEnv, Shared, TrafficStats};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cumulative counters shared by a set of connections
#[derive(Debug, Default)]
pub struct RegistryStats {
    next_id: AtomicU64,
    connected: AtomicUsize,
    rx_bytes: AtomicU64,
    rx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_packets: AtomicU64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Connections currently in the connected part of their run
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn connection_up(&self) {
        self.connected.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn connection_down(&self) {
        // Saturate rather than wrap on an unbalanced decrement
        let _ = self
            .connected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn record_rx(&self, bytes: u64, packets: u64) {
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.rx_packets.fetch_add(packets, Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self, bytes: u64, packets: u64) {
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.tx_packets.fetch_add(packets, Ordering::Relaxed);
    }

    /// Totals since the stats object was created
    pub fn cumulative(&self) -> TrafficStats {
        TrafficStats {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
        }
    }
}

/// Set of live connections
pub struct ConnectionRegistry {
    env: ConnectionEnv,
    live: Mutex<Vec<Weak<Shared>>>,
}

impl ConnectionRegistry {
    pub fn new(env: ConnectionEnv) -> Self {
        ConnectionRegistry {
            env,
            live: Mutex::new(Vec::new()),
        }
    }

    pub fn env(&self) -> &ConnectionEnv {
        &self.env
    }

    pub fn stats(&self) -> &Arc<RegistryStats> {
        &self.env.stats
    }

    /// Create a connection sharing this registry's environment
    pub fn create(&self) -> Connection {
        let conn = Connection::new(self.env.clone());
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(conn.shared()));
        debug!(conn = conn.id(), live = live.len(), "connection registered");
        conn
    }

    /// Strong references to every live connection
    ///
    /// The registry lock is released before the caller touches any
    /// connection.
    fn snapshot(&self) -> Vec<Arc<Shared>> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|weak| weak.strong_count() > 0);
        live.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request a disconnect on every live connection
    pub fn disconnect_all(&self) {
        let connections = self.snapshot();
        info!(count = connections.len(), "disconnecting all connections");
        for shared in &connections {
            shared.request_disconnect();
        }
    }

    /// Disconnect everything and wait until every run has finished
    ///
    /// Returns `false` if `timeout` elapsed with runs still active.
    pub fn disconnect_all_and_wait(&self, timeout: Option<Duration>) -> bool {
        let connections = self.snapshot();
        for shared in &connections {
            shared.request_disconnect();
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        connections.iter().all(|shared| {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            shared.wait_idle(remaining)
        })
    }

    /// Counters summed across live connections
    pub fn totals(&self) -> TrafficStats {
        let mut totals = TrafficStats::default();
        for shared in self.snapshot() {
            totals.add(&shared.traffic());
        }
        totals
    }
}
