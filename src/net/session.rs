//! Session operations abstraction
//!
//! The connection workers talk to their transport through `SessionOps`, so
//! plain TCP and TLS sessions share the same read loop, writer and HTTP
//! exchange code.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::RawFd;
use std::time::Duration;

/// Session operations trait
///
/// Blocking reads and writes with `io::Result` semantics: `Ok(0)` from
/// `read` is end of stream.
pub trait SessionOps: Send {
    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Close the session
    fn close(&mut self) -> io::Result<()>;

    /// Bytes already decoded and waiting inside the session
    fn pending(&self) -> usize {
        0
    }

    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        shutdown_stream(&self.stream)
    }
}

/// Shut down both directions of `stream`
///
/// A socket the peer already reset reports `NotConnected`; there is
/// nothing left to close, so that counts as success.
pub(crate) fn shutdown_stream(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

/// Wait until `fd` is readable (or has hung up)
///
/// Returns `Ok(false)` when the timeout elapses or the wait is interrupted.
pub(crate) fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN};

    let mut pfd = pollfd {
        fd,
        events: POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }

    Ok(result > 0)
}
