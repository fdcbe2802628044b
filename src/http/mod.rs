//! HTTP/1.x client framing
//!
//! Request encoding and response parsing for the HTTP variant of a
//! connection. The module is transport-agnostic: `run_exchange` drives a
//! single request/response over any `ExchangeIo`, which the connection
//! workers implement on top of their read/write primitives.
//!
//! # Architecture
//!
//! - `HttpRequest` builds the request and adds the default headers
//! - `ResponseParser` accumulates the response head, validates it and then
//!   meters the body by `content-length` (or until end of stream)
//! - `run_exchange` sequences the stages: sending the request, awaiting
//!   the reply, downloading the body
//!
//! # Examples
//!
//! ```
//! use tlswire::http::{Method, ResponseParser};
//!
//! let mut parser = ResponseParser::new(Method::Get, 64 * 1024);
//! let step = parser
//!     .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
//!     .unwrap();
//! assert!(step.complete);
//! assert_eq!(step.body, b"hello");
//! assert_eq!(step.head.unwrap().status.code(), 200);
//! ```

pub mod client;
pub mod headers;
pub mod message;
pub mod parser;

pub use client::{run_exchange, Completion, ExchangeIo, ExchangeStage};
pub use headers::Headers;
pub use message::{HttpRequest, Method, Status, Version};
pub use parser::{EofOutcome, ResponseHead, ResponseParser, Step};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP framing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Response head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Connection closed before end of response head")]
    Incomplete,
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 128;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
