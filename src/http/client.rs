//! HTTP exchange driver
//!
//! Runs one request/response over an `ExchangeIo`. The connection reader
//! implements the trait on top of its read/write primitives; tests drive it
//! with scripted transports.

use super::parser::{EofOutcome, ResponseHead, ResponseParser};
use super::{Error, HttpRequest};
use tracing::debug;

/// Stage reached by an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    SendingRequest,
    AwaitingReply,
    Downloading,
}

/// How a successful exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The declared `content-length` was satisfied
    Length,
    /// The peer closed and no length was owed (or the request was HEAD)
    PeerClosed,
    /// The peer closed before the declared length arrived
    Truncated { expected: usize, received: usize },
}

/// Transport and sink for one exchange
pub trait ExchangeIo {
    type Error: From<Error>;

    /// Write the whole request
    fn send(&mut self, wire: &[u8]) -> Result<(), Self::Error>;

    /// Read the next fragment; `Ok(0)` is end of stream
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn stage(&mut self, stage: ExchangeStage);

    fn on_head(&mut self, head: &ResponseHead);

    fn on_body(&mut self, chunk: &[u8]);
}

/// Send `request` and read its response
///
/// `max_head_bytes` bounds the response head; `buffer_size` is the read
/// size handed to `receive`.
pub fn run_exchange<E: ExchangeIo>(
    io: &mut E,
    request: &HttpRequest,
    max_head_bytes: usize,
    buffer_size: usize,
) -> Result<Completion, E::Error> {
    io.stage(ExchangeStage::SendingRequest);
    let wire = request.to_wire();
    io.send(&wire)?;
    debug!(request = %request.request_line(), bytes = wire.len(), "request sent");

    io.stage(ExchangeStage::AwaitingReply);
    let mut parser = ResponseParser::new(request.method(), max_head_bytes);
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = io.receive(&mut buf)?;
        if n == 0 {
            return Ok(match parser.on_eof()? {
                EofOutcome::Complete => Completion::PeerClosed,
                EofOutcome::Truncated { expected, received } => {
                    Completion::Truncated { expected, received }
                }
            });
        }

        let step = parser.feed(&buf[..n])?;
        if let Some(head) = &step.head {
            debug!(status = head.status.code(), length = ?head.content_length(), "response head");
            io.on_head(head);
            io.stage(ExchangeStage::Downloading);
        }
        if !step.body.is_empty() {
            io.on_body(step.body);
        }
        if step.complete {
            return Ok(Completion::Length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::collections::VecDeque;

    /// Replays canned fragments, then end of stream
    #[derive(Default)]
    struct Scripted {
        incoming: VecDeque<Vec<u8>>,
        sent: Vec<u8>,
        stages: Vec<ExchangeStage>,
        heads: Vec<ResponseHead>,
        body: Vec<u8>,
        reads: usize,
    }

    impl Scripted {
        fn new(fragments: &[&[u8]]) -> Self {
            Scripted {
                incoming: fragments.iter().map(|f| f.to_vec()).collect(),
                ..Default::default()
            }
        }
    }

    impl ExchangeIo for Scripted {
        type Error = Error;

        fn send(&mut self, wire: &[u8]) -> Result<(), Error> {
            self.sent.extend_from_slice(wire);
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            self.reads += 1;
            let Some(mut fragment) = self.incoming.pop_front() else {
                return Ok(0);
            };
            let n = fragment.len().min(buf.len());
            buf[..n].copy_from_slice(&fragment[..n]);
            if n < fragment.len() {
                self.incoming.push_front(fragment.split_off(n));
            }
            Ok(n)
        }

        fn stage(&mut self, stage: ExchangeStage) {
            self.stages.push(stage);
        }

        fn on_head(&mut self, head: &ResponseHead) {
            self.heads.push(head.clone());
        }

        fn on_body(&mut self, chunk: &[u8]) {
            self.body.extend_from_slice(chunk);
        }
    }

    fn get() -> HttpRequest {
        HttpRequest::builder().uri("/").header("Host", "localhost").build()
    }

    #[test]
    fn test_exchange_by_length() {
        let mut io = Scripted::new(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello", b"junk"]);
        let completion = run_exchange(&mut io, &get(), 1024, 4096).unwrap();

        assert_eq!(completion, Completion::Length);
        assert_eq!(io.body, b"hello");
        assert_eq!(io.heads[0].status.code(), 200);
        assert_eq!(io.reads, 1);
        assert!(io.sent.starts_with(b"GET / HTTP/1.1\r\n"));
        assert_eq!(
            io.stages,
            vec![
                ExchangeStage::SendingRequest,
                ExchangeStage::AwaitingReply,
                ExchangeStage::Downloading
            ]
        );
    }

    #[test]
    fn test_exchange_small_reads() {
        let mut io = Scripted::new(&[b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world"]);
        let completion = run_exchange(&mut io, &get(), 1024, 3).unwrap();
        assert_eq!(completion, Completion::Length);
        assert_eq!(io.body, b"hello world");
    }

    #[test]
    fn test_exchange_head_request() {
        let request = HttpRequest::new(Method::Head, "/");
        let mut io = Scripted::new(&[b"HTTP/1.1 200 OK\r\nContent-Length: 99\r\n\r\n"]);
        let completion = run_exchange(&mut io, &request, 1024, 4096).unwrap();
        assert_eq!(completion, Completion::PeerClosed);
        assert!(io.body.is_empty());
    }

    #[test]
    fn test_exchange_truncated() {
        let mut io = Scripted::new(&[b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\npart"]);
        let completion = run_exchange(&mut io, &get(), 1024, 4096).unwrap();
        assert_eq!(
            completion,
            Completion::Truncated {
                expected: 8,
                received: 4
            }
        );
        assert_eq!(io.body, b"part");
    }

    #[test]
    fn test_exchange_protocol_error() {
        let mut io = Scripted::new(&[b"HTTP/1.1 2x0 OK\r\n\r\n"]);
        let result = run_exchange(&mut io, &get(), 1024, 4096);
        assert!(matches!(result, Err(Error::InvalidStatus(_))));
        assert!(io.heads.is_empty());
    }

    #[test]
    fn test_exchange_eof_without_head() {
        let mut io = Scripted::new(&[]);
        let result = run_exchange(&mut io, &get(), 1024, 4096);
        assert!(matches!(result, Err(Error::Incomplete)));
    }
}
