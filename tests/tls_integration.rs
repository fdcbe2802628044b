//! Integration tests for TLS connections
//!
//! The server presents the built-in self-signed certificate for
//! `example.com`; connections go to `localhost`, so a strict policy must
//! reject the peer and a fully permissive one must accept it.

mod common;

use common::*;
use std::io::{Read, Write};
use tlswire::http::HttpRequest;
use tlswire::net::{ClosedBy, Connection, StopReason, Target};
use tlswire::tls::BypassFlags;

#[test]
fn test_tls_echo_with_permissive_policy() {
    let (store, _dir) = trusting_store(BypassFlags::all());
    let (env, _events) = env_with(store);

    let (port, server) = spawn_tls_server(|mut stream| {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let conn = Connection::new(env);
    conn.connect(Target::tls("localhost", port)).unwrap();
    assert!(wait_connected(&conn));
    assert!(conn.state().is_encrypted());

    let peer = conn.peer_info().unwrap();
    assert!(peer.certificate.as_ref().unwrap().subject.contains("example.com"));
    assert!(!peer.version.is_empty());

    conn.send(&b"secret"[..]).unwrap();
    assert!(wait_rx_bytes(&conn, 6));
    assert_eq!(conn.recv_all().as_ref(), b"secret");

    conn.disconnect_and_wait();
    server.join().unwrap();

    assert_eq!(conn.stop_reason(), Some(StopReason::Completed));
    assert_eq!(conn.state().closed_by(), Some(ClosedBy::Client));
    assert_eq!(conn.last_error(), None);
}

#[test]
fn test_strict_policy_rejects_untrusted_host() {
    let (store, _dir) = trusting_store(BypassFlags::none());
    let (env, _events) = env_with(store);
    let (port, server) = spawn_tls_server(|_stream| {});

    let conn = Connection::new(env);
    conn.connect(Target::tls("localhost", port)).unwrap();
    assert!(conn.wait_standby(Some(WAIT)));
    server.join().unwrap();

    assert_eq!(conn.stop_reason(), Some(StopReason::Rejected));
    let err = conn.last_error().unwrap();
    assert_eq!(err.code, 3);
    assert!(err.x509_code.is_some());
    assert!(conn.state().has_event_error());
    assert!(conn.peer_info().is_none());
}

#[test]
fn test_empty_trust_store_fails_verification() {
    let (env, _events) = plain_env();
    let (port, server) = spawn_tls_server(|_stream| {});

    let conn = Connection::new(env);
    conn.connect(Target::tls("127.0.0.1", port)).unwrap();
    assert!(conn.wait_standby(Some(WAIT)));
    server.join().unwrap();

    assert_eq!(conn.stop_reason(), Some(StopReason::Rejected));
    assert_eq!(conn.last_error().unwrap().code, 3);
}

#[test]
fn test_http_over_tls() {
    let (store, _dir) = trusting_store(BypassFlags::all());
    let (env, _events) = env_with(store);

    let (port, server) = spawn_tls_server(|mut stream| {
        let head = read_request_head(&mut stream);
        assert!(head.starts_with("GET /secure HTTP/1.1\r\n"));
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        let _ = stream.shutdown();
    });

    let conn = Connection::new(env);
    let request = HttpRequest::builder().uri("/secure").build();
    conn.http_request(Target::tls("localhost", port), request)
        .unwrap();
    assert!(conn.wait_standby(Some(WAIT)));
    server.join().unwrap();

    assert_eq!(conn.response_status(), Some(200));
    assert_eq!(conn.recv_all().as_ref(), b"ok");
    assert_eq!(conn.stop_reason(), Some(StopReason::Completed));
    assert!(conn.state().is_encrypted());
}
