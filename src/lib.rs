//! tlswire - client-side encrypted connection engine
//!
//! This crate drives many simultaneous outbound TCP/TLS connections from
//! blocking worker threads. Each connection runs a reader thread (connect,
//! handshake, certificate verification, read loop) and, in raw mode, a
//! writer thread fed through a condition variable. Callers interact with
//! connections only through thread-safe accessors and an event sink.
//!
//! An optional HTTP/1.x mode sends a single request and parses the response
//! head and body from the same read loop.

pub mod config;
pub mod http;
pub mod net;
pub mod tls;
