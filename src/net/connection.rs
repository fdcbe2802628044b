//! Outbound connection
//!
//! `Connection` is the caller's handle. All mutable per-connection state
//! lives in one `Shared` block guarded by a single mutex; the transport and
//! the socket registered for force-close have their own locks, and no code
//! path holds two of these at once.

use super::events::{EventSink, NullSink};
use super::queue::{Packet, PacketQueue};
use super::registry::RegistryStats;
use super::session::SessionOps;
use super::state::{ClosedBy, ConnectionEvent, ConnectionState, HttpStage, Phase, StopReason};
use super::worker::{self, Mode};
use super::{Error, Result};
use crate::config::{ConfigError, ConnectionSettings};
use crate::http::{headers, Headers, HttpRequest};
use crate::tls::{CertificateStore, PeerInfo};
use bytes::Bytes;
use socket2::Socket;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Remote endpoint of a connection run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Perform a TLS handshake after connecting
    pub tls: bool,
}

impl Target {
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Target {
            host: host.into(),
            port,
            tls: false,
        }
    }

    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Target {
            host: host.into(),
            port,
            tls: true,
        }
    }
}

/// Byte and packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl TrafficStats {
    pub(crate) fn add(&mut self, other: &TrafficStats) {
        self.rx_bytes += other.rx_bytes;
        self.rx_packets += other.rx_packets;
        self.tx_bytes += other.tx_bytes;
        self.tx_packets += other.tx_packets;
    }
}

/// Lifecycle timestamps of the current (or last) run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub connect_started: Option<Instant>,
    pub connected: Option<Instant>,
    pub last_read: Option<Instant>,
    pub last_write: Option<Instant>,
    pub disconnect_started: Option<Instant>,
    pub disconnected: Option<Instant>,
}

/// First failure recorded during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// `Error::code` of the failure
    pub code: i32,
    /// Verification error code, when the failure was a certificate rejection
    pub x509_code: Option<i32>,
    pub reason: String,
}

/// Collaborators shared by the connections of one registry
#[derive(Clone)]
pub struct ConnectionEnv {
    pub settings: Arc<ConnectionSettings>,
    pub store: Arc<CertificateStore>,
    pub stats: Arc<RegistryStats>,
    pub sink: Arc<dyn EventSink>,
}

impl ConnectionEnv {
    /// Environment with fresh statistics and no event sink
    pub fn new(settings: Arc<ConnectionSettings>, store: Arc<CertificateStore>) -> Self {
        ConnectionEnv {
            settings,
            store,
            stats: Arc::new(RegistryStats::new()),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RegistryStats>) -> Self {
        self.stats = stats;
        self
    }
}

pub(crate) struct Inner {
    pub(crate) state: ConnectionState,
    /// A reader thread owns the current run
    pub(crate) running: bool,
    pub(crate) http_mode: bool,
    pub(crate) target: Option<Target>,
    pub(crate) rx: PacketQueue,
    pub(crate) tx: PacketQueue,
    pub(crate) registry: Headers,
    pub(crate) traffic: TrafficStats,
    pub(crate) timestamps: Timestamps,
    pub(crate) last_error: Option<LastError>,
    pub(crate) stop: Option<StopReason>,
    pub(crate) peer: Option<PeerInfo>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            state: ConnectionState::default(),
            running: false,
            http_mode: false,
            target: None,
            rx: PacketQueue::new(),
            tx: PacketQueue::new(),
            registry: Headers::new(),
            traffic: TrafficStats::default(),
            timestamps: Timestamps::default(),
            last_error: None,
            stop: None,
            peer: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) env: ConnectionEnv,
    pub(crate) should_exit: AtomicBool,
    pub(crate) inner: Mutex<Inner>,
    /// Signalled when TX data arrives or the writer must exit
    pub(crate) tx_ready: Condvar,
    /// Signalled when a run has fully finished
    pub(crate) idle: Condvar,
    pub(crate) transport: Mutex<Option<Box<dyn SessionOps>>>,
    /// Duplicate of the connection's socket, used only to force it closed
    pub(crate) socket: Mutex<Option<Socket>>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_transport(&self) -> MutexGuard<'_, Option<Box<dyn SessionOps>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn settings(&self) -> &ConnectionSettings {
        &self.env.settings
    }

    pub(crate) fn exiting(&self) -> bool {
        self.should_exit.load(Ordering::Acquire)
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        debug!(conn = self.id, ?event, "connection event");
        self.env.sink.emit(self.id, event);
    }

    pub(crate) fn register_socket(&self, socket: Option<Socket>) {
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = socket;
    }

    /// Shut the registered socket down so blocked I/O returns
    pub(crate) fn force_close(&self) {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(socket) = socket {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(conn = self.id, error = %e, "force close");
            }
        }
    }

    /// Wake the writer so it re-checks the exit flag
    pub(crate) fn wake_writer(&self) {
        let _guard = self.lock();
        self.tx_ready.notify_all();
    }

    /// Record the first failure of this run
    pub(crate) fn record_error(&self, err: &Error) {
        let mut inner = self.lock();
        inner.state.set_event_error();
        if inner.last_error.is_none() {
            let x509_code = match err {
                Error::Verification { code, .. } => Some(*code),
                _ => None,
            };
            inner.last_error = Some(LastError {
                code: err.code(),
                x509_code,
                reason: err.to_string(),
            });
        }
        drop(inner);
        error!(conn = self.id, code = err.code(), error = %err, "connection failed");
    }

    /// Record how the connection closed; the first caller wins
    pub(crate) fn mark_closed(&self, by: ClosedBy) {
        let marked = self.lock().state.mark_closed(by);
        if marked {
            self.emit(by.into());
        }
    }

    pub(crate) fn set_http_stage(&self, stage: HttpStage) {
        let changed = self.lock().state.set_http_stage(stage);
        if changed {
            self.emit(stage.into());
        }
    }

    /// Enter `Disconnecting` once and note the stop reason
    pub(crate) fn begin_disconnect(&self, reason: StopReason) -> bool {
        let mut inner = self.lock();
        inner.stop.get_or_insert(reason);
        let began = inner.state.begin_disconnect();
        if began {
            inner.timestamps.disconnect_started = Some(Instant::now());
        }
        drop(inner);
        if began {
            self.emit(ConnectionEvent::Disconnecting);
        }
        began
    }

    /// Caller-side disconnect: never blocks on I/O
    pub(crate) fn request_disconnect(&self) {
        let reason = {
            let inner = self.lock();
            if !inner.running || inner.state.phase() == Phase::Disconnecting {
                return;
            }
            if inner.state.phase() == Phase::Connected && !inner.http_mode {
                StopReason::Completed
            } else {
                StopReason::Aborted
            }
        };

        self.mark_closed(ClosedBy::Client);
        self.begin_disconnect(reason);
        self.should_exit.store(true, Ordering::Release);
        self.force_close();
        self.wake_writer();
    }

    pub(crate) fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let inner = self.lock();
        match timeout {
            None => {
                let _inner = self
                    .idle
                    .wait_while(inner, |inner| inner.running)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (inner, _) = self
                    .idle
                    .wait_timeout_while(inner, timeout, |inner| inner.running)
                    .unwrap_or_else(PoisonError::into_inner);
                !inner.running
            }
        }
    }

    pub(crate) fn traffic(&self) -> TrafficStats {
        self.lock().traffic
    }
}

/// Handle to one outbound connection
///
/// Dropping the handle disconnects and joins the worker threads.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(env: ConnectionEnv) -> Self {
        let id = env.stats.next_id();
        Connection {
            shared: Arc::new(Shared {
                id,
                env,
                should_exit: AtomicBool::new(false),
                inner: Mutex::new(Inner::new()),
                tx_ready: Condvar::new(),
                idle: Condvar::new(),
                transport: Mutex::new(None),
                socket: Mutex::new(None),
            }),
            reader: Mutex::new(None),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Start a raw connection run
    ///
    /// Returns as soon as the reader thread is started; progress is
    /// reported through events and `state`.
    pub fn connect(&self, target: Target) -> Result<()> {
        self.start(target, Mode::Raw)
    }

    /// Start an HTTP run: connect, send `request`, read the response
    ///
    /// The response headers land in the staging registry and the body in
    /// the RX queue.
    pub fn http_request(&self, target: Target, mut request: HttpRequest) -> Result<()> {
        request.apply_defaults(
            &target.host,
            target.port,
            target.tls,
            &self.shared.settings().user_agent,
        );
        self.start(target, Mode::Http(Box::new(request)))
    }

    fn start(&self, target: Target, mode: Mode) -> Result<()> {
        self.shared
            .settings()
            .validate()
            .map_err(ConfigError::Validation)?;

        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut inner = self.shared.lock();
            if inner.running || !inner.state.begin_run() {
                return Err(Error::InvalidState(format!(
                    "connection {} is not in standby",
                    self.shared.id
                )));
            }
            inner.running = true;
            inner.http_mode = matches!(mode, Mode::Http(_));
            inner.target = Some(target.clone());
            inner.rx.flush();
            inner.tx.flush();
            inner.registry.clear();
            inner.traffic = TrafficStats::default();
            inner.timestamps = Timestamps::default();
            inner.last_error = None;
            inner.stop = None;
            inner.peer = None;
        }

        // The previous run has finished; reap its thread
        if let Some(stale) = reader.take() {
            let _ = stale.join();
        }

        self.shared.should_exit.store(false, Ordering::Release);
        info!(conn = self.shared.id, host = %target.host, port = target.port, tls = target.tls, "connection requested");

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("tlswire-rx-{}", self.shared.id))
            .spawn(move || worker::run_reader(shared, target, mode));

        match spawned {
            Ok(handle) => {
                *reader = Some(handle);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.shared.lock();
                inner.running = false;
                inner.state.enter_standby();
                Err(Error::Io(e))
            }
        }
    }

    /// Queue data for the writer
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let mut inner = self.shared.lock();
        if inner.state.phase() != Phase::Connected || inner.http_mode {
            return Err(Error::InvalidState(format!(
                "send requires a connected raw connection (phase {:?})",
                inner.state.phase()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        inner.tx.push(data);
        self.shared.tx_ready.notify_one();
        Ok(())
    }

    /// Pop the oldest received packet
    pub fn recv(&self) -> Result<Packet> {
        let mut inner = self.shared.lock();
        let packet = inner.rx.pop()?;
        if inner.rx.is_empty() {
            inner.state.set_packet_received(false);
        }
        Ok(packet)
    }

    /// Everything received so far, as one buffer
    pub fn recv_all(&self) -> Bytes {
        let mut inner = self.shared.lock();
        inner.state.set_packet_received(false);
        inner.rx.compact()
    }

    /// Packets and bytes waiting in the RX queue
    pub fn rx_pending(&self) -> (usize, usize) {
        let inner = self.shared.lock();
        (inner.rx.len(), inner.rx.byte_total())
    }

    /// Packets and bytes not yet written
    pub fn tx_pending(&self) -> (usize, usize) {
        let inner = self.shared.lock();
        (inner.tx.len(), inner.tx.byte_total())
    }

    /// Request a disconnect; idempotent and non-blocking
    pub fn disconnect(&self) {
        self.shared.request_disconnect();
    }

    /// Disconnect and wait for the worker threads to finish
    pub fn disconnect_and_wait(&self) {
        self.shared.request_disconnect();

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
        self.shared.wait_idle(None);
    }

    /// Block until the current run has finished
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_standby(&self, timeout: Option<Duration>) -> bool {
        self.shared.wait_idle(timeout)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn target(&self) -> Option<Target> {
        self.shared.lock().target.clone()
    }

    pub fn stats(&self) -> TrafficStats {
        self.shared.traffic()
    }

    pub fn timestamps(&self) -> Timestamps {
        self.shared.lock().timestamps
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.shared.lock().last_error.clone()
    }

    /// Outcome of the last finished run
    pub fn stop_reason(&self) -> Option<StopReason> {
        let inner = self.shared.lock();
        if inner.running {
            return None;
        }
        inner.stop
    }

    /// Negotiated TLS parameters of the current run
    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.shared.lock().peer.clone()
    }

    /// Look up a staged response header or pseudo-key
    pub fn header(&self, name: &str) -> Option<String> {
        self.shared.lock().registry.get(name).map(str::to_string)
    }

    /// The whole staging registry
    pub fn registry(&self) -> Headers {
        self.shared.lock().registry.clone()
    }

    /// Response status of the last HTTP run
    pub fn response_status(&self) -> Option<u16> {
        self.header(headers::PSEUDO_STATUS)
            .and_then(|status| status.parse().ok())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect_and_wait();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("target", &inner.target)
            .field("state", &inner.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection::new(ConnectionEnv::new(
            Arc::new(ConnectionSettings::default()),
            Arc::new(CertificateStore::new()),
        ))
    }

    #[test]
    fn test_new_connection_is_idle() {
        let conn = connection();
        assert!(conn.state().is_standby());
        assert!(!conn.is_running());
        assert!(conn.wait_standby(Some(Duration::from_millis(1))));
        assert_eq!(conn.stop_reason(), None);
        assert_eq!(conn.stats(), TrafficStats::default());
    }

    #[test]
    fn test_send_requires_connected() {
        let conn = connection();
        assert!(matches!(conn.send(&b"data"[..]), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_recv_empty() {
        let conn = connection();
        assert!(matches!(conn.recv(), Err(Error::QueueEmpty)));
        assert!(conn.recv_all().is_empty());
    }

    #[test]
    fn test_disconnect_idle_is_noop() {
        let conn = connection();
        conn.disconnect();
        conn.disconnect_and_wait();
        assert!(conn.state().is_standby());
        assert_eq!(conn.timestamps(), Timestamps::default());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = ConnectionSettings {
            rx_buffer_size: 1,
            ..ConnectionSettings::default()
        };
        let conn = Connection::new(ConnectionEnv::new(
            Arc::new(settings),
            Arc::new(CertificateStore::new()),
        ));
        let result = conn.connect(Target::plain("127.0.0.1", 1));
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!conn.is_running());
    }

    #[test]
    fn test_ids_are_unique() {
        let stats = Arc::new(RegistryStats::new());
        let env = ConnectionEnv::new(
            Arc::new(ConnectionSettings::default()),
            Arc::new(CertificateStore::new()),
        )
        .with_stats(Arc::clone(&stats));
        let a = Connection::new(env.clone());
        let b = Connection::new(env);
        assert_ne!(a.id(), b.id());
    }
}
