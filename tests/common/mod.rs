//! Shared fixtures for the integration tests
//!
//! Loopback servers run on `127.0.0.1:0` in plain threads; TLS servers use
//! the built-in self-signed certificate.

#![allow(dead_code)]

use openssl::pkey::PKey;
use openssl::ssl::{SslAcceptor, SslMethod, SslStream};
use openssl::x509::X509;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tlswire::config::ConnectionSettings;
use tlswire::net::{ChannelSink, Connection, ConnectionEnv, Notification, Phase};
use tlswire::tls::builtin_cert::{builtin_cert_der, BUILTIN_CERT};
use tlswire::tls::{BypassFlags, CertificateStore, FsLoader};
use tracing_subscriber::EnvFilter;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        rx_timeout_secs: 10,
        tx_timeout_secs: 10,
        connect_timeout_secs: 5,
        ..ConnectionSettings::default()
    }
}

pub fn env_with(store: Arc<CertificateStore>) -> (ConnectionEnv, Receiver<Notification>) {
    init_tracing();
    let (sink, rx) = ChannelSink::new();
    let env = ConnectionEnv::new(Arc::new(settings()), store).with_sink(Arc::new(sink));
    (env, rx)
}

pub fn plain_env() -> (ConnectionEnv, Receiver<Notification>) {
    env_with(Arc::new(CertificateStore::new()))
}

/// Trust store holding the built-in certificate, loaded from a DER file
pub fn trusting_store(bypass: BypassFlags) -> (Arc<CertificateStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("builtin.der");
    std::fs::write(&path, builtin_cert_der().unwrap()).unwrap();

    let store = Arc::new(CertificateStore::new());
    assert_eq!(store.load_bundle(&FsLoader, &[path]).unwrap(), 1);
    store.set_bypass(bypass);
    (store, dir)
}

/// Accept one plain connection and hand it to `handler`
pub fn spawn_server<F>(handler: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        handler(stream);
    });

    (port, handle)
}

pub fn tls_acceptor() -> SslAcceptor {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor
        .set_certificate(&X509::from_pem(BUILTIN_CERT.as_bytes()).unwrap())
        .unwrap();
    acceptor
        .set_private_key(&PKey::private_key_from_pem(BUILTIN_CERT.as_bytes()).unwrap())
        .unwrap();
    acceptor.build()
}

/// Accept one TLS connection; a failed handshake ends the server quietly
pub fn spawn_tls_server<F>(handler: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(SslStream<TcpStream>) + Send + 'static,
{
    let acceptor = tls_acceptor();
    spawn_server(move |tcp| {
        if let Ok(stream) = acceptor.accept(tcp) {
            handler(stream);
        }
    })
}

/// Poll `cond` until it holds or `WAIT` runs out
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn wait_connected(conn: &Connection) -> bool {
    wait_for(|| conn.state().phase() == Phase::Connected)
}

/// Wait until at least `len` bytes are queued for the caller
pub fn wait_rx_bytes(conn: &Connection, len: usize) -> bool {
    wait_for(|| conn.rx_pending().1 >= len)
}

/// Write a canned HTTP response after draining the request head
pub fn respond(mut stream: TcpStream, response: &[u8]) {
    read_request_head(&mut stream);
    stream.write_all(response).unwrap();
}

pub fn read_request_head<S: std::io::Read>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}
