//! Reader and writer thread bodies
//!
//! The reader owns a run from start to finish: it connects, hands the
//! transport to the raw read loop or the HTTP exchange, and always ends in
//! `finish`, the only place that tears a run down. The writer only exists
//! in raw mode and never touches lifecycle state except to report its own
//! failure.

use super::connection::{Shared, Target};
use super::session::{poll_readable, FdSessionOps, SessionOps};
use super::state::{ClosedBy, ConnectionEvent, HttpStage, StopReason};
use super::{Error, Result};
use crate::http::{
    headers, run_exchange, Completion, ExchangeIo, ExchangeStage, HttpRequest, ResponseHead,
};
use crate::tls::{ClientContext, TlsSessionOps};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Longest single blocking wait inside the read primitive
const READ_SLICE: Duration = Duration::from_millis(100);

/// What the reader does once connected
pub(crate) enum Mode {
    Raw,
    Http(Box<HttpRequest>),
}

pub(crate) enum ReadOutcome {
    Data(usize),
    Closed,
}

pub(crate) enum WriteOutcome {
    Written(usize),
    Closed,
}

enum Ending {
    Completed,
    ClosedByPeer,
    Failed(Error),
}

#[derive(Default)]
struct Progress {
    connected: bool,
    writer: Option<JoinHandle<()>>,
}

pub(crate) fn run_reader(shared: Arc<Shared>, target: Target, mode: Mode) {
    let mut progress = Progress::default();
    let ending = match run(&shared, &target, mode, &mut progress) {
        Ok(ending) => ending,
        Err(e) => Ending::Failed(e),
    };
    finish(&shared, ending, progress);
}

fn checkpoint(shared: &Shared) -> Result<()> {
    if shared.exiting() {
        return Err(Error::Aborted);
    }
    Ok(())
}

fn run(shared: &Arc<Shared>, target: &Target, mode: Mode, progress: &mut Progress) -> Result<Ending> {
    let (session, fd) = establish(shared, target)?;
    let encrypted = session.is_encrypted();
    *shared.lock_transport() = Some(session);

    {
        let mut inner = shared.lock();
        if !inner.state.enter_connected() {
            return Err(Error::Aborted);
        }
        if encrypted {
            inner.state.set_encrypted();
        }
        inner.timestamps.connected = Some(Instant::now());
        // Counted before the phase becomes observable
        shared.env.stats.connection_up();
    }
    progress.connected = true;
    shared.emit(ConnectionEvent::Connected);
    info!(conn = shared.id, host = %target.host, port = target.port, encrypted, "connected");

    match mode {
        Mode::Raw => {
            let writer_shared = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name(format!("tlswire-tx-{}", shared.id))
                .spawn(move || run_writer(writer_shared))?;
            progress.writer = Some(handle);
            read_loop(shared, fd)
        }
        Mode::Http(request) => exchange(shared, fd, &request),
    }
}

/// Resolve, connect and (for TLS targets) handshake
fn establish(shared: &Shared, target: &Target) -> Result<(Box<dyn SessionOps>, RawFd)> {
    {
        let mut inner = shared.lock();
        if !inner.state.enter_connecting() {
            return Err(Error::Aborted);
        }
        inner.timestamps.connect_started = Some(Instant::now());
    }
    shared.emit(ConnectionEvent::Connecting);

    checkpoint(shared)?;
    let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| Error::Resolve {
            host: target.host.clone(),
            reason: e.to_string(),
        })?
        .collect();

    let settings = shared.settings();
    let mut connected = None;
    let mut last_err = None;

    for addr in addrs {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_recv_buffer_size(settings.rx_buffer_size)?;
        socket.set_send_buffer_size(settings.tx_buffer_size)?;
        shared.register_socket(Some(socket.try_clone()?));
        checkpoint(shared)?;

        match socket.connect_timeout(&addr.into(), settings.connect_timeout()) {
            Ok(()) => {
                connected = Some((socket, addr));
                break;
            }
            Err(e) => {
                debug!(conn = shared.id, %addr, error = %e, "connect attempt failed");
                last_err = Some(Error::Connect {
                    addr: addr.to_string(),
                    source: e,
                });
            }
        }
    }

    let Some((socket, addr)) = connected else {
        return Err(last_err.unwrap_or_else(|| Error::Resolve {
            host: target.host.clone(),
            reason: "no addresses".to_string(),
        }));
    };
    checkpoint(shared)?;
    debug!(conn = shared.id, %addr, "tcp connected");

    socket.set_nodelay(true)?;
    let fd = socket.as_raw_fd();
    let tcp: TcpStream = socket.into();

    if !target.tls {
        set_io_timeouts(&tcp, settings.tx_timeout())?;
        return Ok((Box::new(FdSessionOps::new(tcp)), fd));
    }

    tcp.set_read_timeout(Some(settings.connect_timeout()))?;
    tcp.set_write_timeout(Some(settings.connect_timeout()))?;
    let context = ClientContext::build(settings, &shared.env.store)?;
    let session = TlsSessionOps::connect(tcp, &context, &target.host)?;
    set_io_timeouts(session.get_ref(), settings.tx_timeout())?;
    shared.lock().peer = Some(session.peer().clone());

    Ok((Box::new(session), fd))
}

fn set_io_timeouts(tcp: &TcpStream, tx_timeout: Option<Duration>) -> io::Result<()> {
    tcp.set_read_timeout(Some(READ_SLICE))?;
    tcp.set_write_timeout(tx_timeout)
}

fn is_retry(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Read primitive
///
/// Waits in short slices so cancellation is seen promptly and the writer
/// can take the transport between reads. The receive timeout bounds the
/// total wait for the next bytes.
pub(crate) fn read_some(shared: &Shared, fd: RawFd, buf: &mut [u8]) -> Result<ReadOutcome> {
    let idle_limit = shared.settings().rx_timeout();
    let started = Instant::now();
    let timed_out = || idle_limit.is_some_and(|limit| started.elapsed() >= limit);

    loop {
        checkpoint(shared)?;

        let buffered = shared
            .lock_transport()
            .as_ref()
            .is_some_and(|session| session.pending() > 0);
        if !buffered && !poll_readable(fd, READ_SLICE)? {
            if timed_out() {
                return Err(Error::Timeout);
            }
            continue;
        }

        let result = {
            let mut transport = shared.lock_transport();
            let Some(session) = transport.as_mut() else {
                return Err(Error::Aborted);
            };
            session.read(buf)
        };

        match result {
            Ok(0) => {
                checkpoint(shared)?;
                return Ok(ReadOutcome::Closed);
            }
            Ok(n) => {
                {
                    let mut inner = shared.lock();
                    inner.traffic.rx_bytes += n as u64;
                    inner.timestamps.last_read = Some(Instant::now());
                }
                shared.env.stats.record_rx(n as u64, 0);
                return Ok(ReadOutcome::Data(n));
            }
            Err(e) if is_retry(&e) => {
                if timed_out() {
                    return Err(Error::Timeout);
                }
            }
            Err(e) => {
                checkpoint(shared)?;
                return Err(Error::Io(e));
            }
        }
    }
}

/// Write primitive; a short write is terminal
pub(crate) fn write_some(shared: &Shared, data: &[u8]) -> Result<WriteOutcome> {
    checkpoint(shared)?;

    let result = {
        let mut transport = shared.lock_transport();
        let Some(session) = transport.as_mut() else {
            return Err(Error::Aborted);
        };
        session.write(data)
    };

    match result {
        Ok(0) if !data.is_empty() => Ok(WriteOutcome::Closed),
        Ok(n) if n < data.len() => Err(Error::ShortWrite {
            requested: data.len(),
            written: n,
        }),
        Ok(n) => {
            {
                let mut inner = shared.lock();
                inner.traffic.tx_bytes += n as u64;
                inner.traffic.tx_packets += 1;
                inner.timestamps.last_write = Some(Instant::now());
            }
            shared.env.stats.record_tx(n as u64, 1);
            Ok(WriteOutcome::Written(n))
        }
        Err(e) => {
            checkpoint(shared)?;
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                return Err(Error::Timeout);
            }
            Err(Error::Io(e))
        }
    }
}

/// Queue received bytes for the caller
fn deliver(shared: &Shared, data: &[u8]) {
    {
        let mut inner = shared.lock();
        inner.rx.push(Bytes::copy_from_slice(data));
        inner.traffic.rx_packets += 1;
        inner.state.set_packet_received(true);
    }
    shared.env.stats.record_rx(0, 1);
    shared.emit(ConnectionEvent::PacketAvailable);
}

fn read_loop(shared: &Shared, fd: RawFd) -> Result<Ending> {
    let mut buf = vec![0u8; shared.settings().rx_buffer_size];
    loop {
        match read_some(shared, fd, &mut buf)? {
            ReadOutcome::Data(n) => deliver(shared, &buf[..n]),
            ReadOutcome::Closed => {
                shared.mark_closed(ClosedBy::Server);
                return Ok(Ending::ClosedByPeer);
            }
        }
    }
}

/// Read/write primitives as seen by the HTTP exchange
struct ExchangeTransport<'a> {
    shared: &'a Shared,
    fd: RawFd,
}

impl ExchangeIo for ExchangeTransport<'_> {
    type Error = Error;

    fn send(&mut self, wire: &[u8]) -> Result<()> {
        match write_some(self.shared, wire)? {
            WriteOutcome::Written(_) => Ok(()),
            WriteOutcome::Closed => Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "peer closed while sending request",
            ))),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match read_some(self.shared, self.fd, buf)? {
            ReadOutcome::Data(n) => Ok(n),
            ReadOutcome::Closed => Ok(0),
        }
    }

    fn stage(&mut self, stage: ExchangeStage) {
        let stage = match stage {
            ExchangeStage::SendingRequest => HttpStage::SendingRequest,
            ExchangeStage::AwaitingReply => HttpStage::AwaitingReply,
            ExchangeStage::Downloading => HttpStage::Downloading,
        };
        self.shared.set_http_stage(stage);
    }

    fn on_head(&mut self, head: &ResponseHead) {
        let mut inner = self.shared.lock();
        // Pseudo-keys first so the header cap never drops them
        inner.registry.set(headers::PSEUDO_PROTOCOL, head.version.as_str());
        inner.registry.set(headers::PSEUDO_STATUS, head.status.code().to_string());
        inner.registry.set(headers::PSEUDO_REASON, head.reason.as_str());
        for (name, value) in head.headers.iter() {
            inner.registry.insert(name, value);
        }
    }

    fn on_body(&mut self, chunk: &[u8]) {
        deliver(self.shared, chunk);
    }
}

fn exchange(shared: &Shared, fd: RawFd, request: &HttpRequest) -> Result<Ending> {
    {
        let mut inner = shared.lock();
        inner.registry.set(headers::PSEUDO_METHOD, request.method().as_str());
        inner.registry.set(headers::PSEUDO_REQUEST_LINE, request.request_line());
    }

    let settings = shared.settings();
    let mut io = ExchangeTransport { shared, fd };
    let completion = run_exchange(
        &mut io,
        request,
        settings.max_header_bytes,
        settings.rx_buffer_size,
    )?;

    Ok(match completion {
        Completion::Length => {
            shared.mark_closed(ClosedBy::Client);
            Ending::Completed
        }
        Completion::PeerClosed => {
            shared.mark_closed(ClosedBy::Server);
            Ending::Completed
        }
        Completion::Truncated { expected, received } => {
            warn!(conn = shared.id, expected, received, "response body truncated");
            shared.mark_closed(ClosedBy::Server);
            Ending::ClosedByPeer
        }
    })
}

/// End the run from a worker thread
fn terminate(shared: &Shared, reason: StopReason) {
    shared.begin_disconnect(reason);
    shared.should_exit.store(true, Ordering::Release);
    shared.force_close();
    shared.wake_writer();
}

fn run_writer(shared: Arc<Shared>) {
    debug!(conn = shared.id, "writer started");
    loop {
        let packet = {
            let mut inner = shared.lock();
            loop {
                if shared.exiting() {
                    debug!(conn = shared.id, "writer exiting");
                    return;
                }
                if let Ok(packet) = inner.tx.pop() {
                    break packet;
                }
                inner = shared
                    .tx_ready
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match write_some(&shared, packet.data()) {
            Ok(WriteOutcome::Written(n)) => trace!(conn = shared.id, bytes = n, "packet written"),
            Ok(WriteOutcome::Closed) => {
                shared.mark_closed(ClosedBy::Server);
                terminate(&shared, StopReason::ClosedByPeer);
                return;
            }
            Err(Error::Aborted) => return,
            Err(e) => {
                shared.record_error(&e);
                terminate(&shared, StopReason::Rejected);
                return;
            }
        }
    }
}

/// Single teardown path for every run
fn finish(shared: &Arc<Shared>, ending: Ending, progress: Progress) {
    let reason = match ending {
        Ending::Completed => StopReason::Completed,
        Ending::ClosedByPeer => StopReason::ClosedByPeer,
        Ending::Failed(Error::Aborted) => StopReason::Aborted,
        // Failures after an exit request are fallout of that request
        Ending::Failed(_) if shared.exiting() => StopReason::Aborted,
        Ending::Failed(e) => {
            shared.record_error(&e);
            StopReason::Rejected
        }
    };

    shared.begin_disconnect(reason);
    shared.should_exit.store(true, Ordering::Release);
    if progress.writer.is_some() {
        shared.force_close();
    }
    shared.wake_writer();
    if let Some(writer) = progress.writer {
        let _ = writer.join();
    }

    let transport = shared.lock_transport().take();
    if let Some(mut session) = transport {
        if let Err(e) = session.close() {
            debug!(conn = shared.id, error = %e, "transport close");
        }
    }
    shared.register_socket(None);

    if progress.connected {
        shared.env.stats.connection_down();
    }

    let reason = {
        let mut inner = shared.lock();
        inner.state.enter_standby();
        inner.timestamps.disconnected = Some(Instant::now());
        *inner.stop.get_or_insert(reason)
    };
    shared.emit(ConnectionEvent::Standby);
    shared.env.sink.stopped(shared.id, reason);
    info!(conn = shared.id, %reason, "disconnected");

    let mut inner = shared.lock();
    inner.running = false;
    shared.idle.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;
    use crate::net::connection::{Connection, ConnectionEnv};
    use crate::net::state::Phase;
    use crate::tls::CertificateStore;
    use std::sync::Mutex;

    /// Accepts fewer bytes than offered
    struct HalfWriter {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl SessionOps for HalfWriter {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len() / 2;
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection() -> Connection {
        Connection::new(ConnectionEnv::new(
            Arc::new(ConnectionSettings::default()),
            Arc::new(CertificateStore::new()),
        ))
    }

    #[test]
    fn test_short_write_is_error() {
        let conn = connection();
        let written = Arc::new(Mutex::new(Vec::new()));
        *conn.shared().lock_transport() = Some(Box::new(HalfWriter {
            written: Arc::clone(&written),
        }));

        let result = write_some(conn.shared(), b"0123456789");
        assert!(matches!(
            result,
            Err(Error::ShortWrite {
                requested: 10,
                written: 5
            })
        ));
        assert_eq!(conn.stats().tx_bytes, 0);
        assert_eq!(written.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_writer_short_write_ends_run() {
        let conn = connection();
        let shared = Arc::clone(conn.shared());
        *shared.lock_transport() = Some(Box::new(HalfWriter {
            written: Arc::default(),
        }));
        {
            let mut inner = shared.lock();
            assert!(inner.state.begin_run());
            assert!(inner.state.enter_connecting());
            assert!(inner.state.enter_connected());
            inner.running = true;
        }
        conn.send(&b"0123456789"[..]).unwrap();

        let writer_shared = Arc::clone(&shared);
        thread::spawn(move || run_writer(writer_shared))
            .join()
            .unwrap();
        assert!(shared.exiting());
        assert_eq!(shared.lock().state.phase(), Phase::Disconnecting);

        // The reader sees the exit request and tears the run down
        finish(&shared, Ending::Failed(Error::Aborted), Progress::default());

        let state = conn.state();
        assert!(state.is_standby());
        assert!(state.has_event_error());
        assert_eq!(conn.stop_reason(), Some(StopReason::Rejected));
        assert_eq!(conn.last_error().unwrap().code, 7);
        assert_eq!(conn.stats().tx_bytes, 0);
        assert!(shared.lock_transport().is_none());
    }

    #[test]
    fn test_write_after_exit_request_is_aborted() {
        let conn = connection();
        *conn.shared().lock_transport() = Some(Box::new(HalfWriter {
            written: Arc::default(),
        }));
        conn.shared().should_exit.store(true, Ordering::Release);

        assert!(matches!(write_some(conn.shared(), b"x"), Err(Error::Aborted)));
        conn.shared().should_exit.store(false, Ordering::Release);
    }

    #[test]
    fn test_write_without_transport_is_aborted() {
        let conn = connection();
        assert!(matches!(write_some(conn.shared(), b"x"), Err(Error::Aborted)));
    }
}
