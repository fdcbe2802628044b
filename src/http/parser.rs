//! HTTP response parsing
//!
//! `ResponseParser` consumes the byte stream of one response in whatever
//! fragments the transport delivers. Head bytes accumulate until the blank
//! line; every fragment is checked for binary bytes as it arrives. After
//! the head, body bytes are passed through, metered by `content-length`
//! when one is present. The response to a `HEAD` request carries no body
//! and ends at end of stream.

use super::headers::is_head_byte;
use super::{Error, Headers, Method, Result, Status, Version};

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Find the blank line ending a response head
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}

/// Parse an HTTP response status line
///
/// Format: VERSION STATUS [REASON]
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let (proto, rest) = line
        .split_once(' ')
        .ok_or_else(|| Error::Parse(format!("Invalid status line: {}", line)))?;

    let version = Version::from_str(proto)?;
    let rest = rest.trim_start();
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));

    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidStatus(code.to_string()));
    }
    let code = code
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(code.to_string()))?;
    let status = Status::new(code)?;

    let reason = match reason.trim() {
        "" => status.reason_phrase().to_string(),
        reason => reason.to_string(),
    };

    Ok((version, status, reason))
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    /// Lower-cased names, in arrival order
    pub headers: Headers,
}

impl ResponseHead {
    /// Parse a head without its terminating blank line
    fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| Error::Parse("Empty response head".to_string()))?;
        let (version, status, reason) = parse_status_line(status_line)?;

        let headers = lines.filter_map(Headers::parse_header_line).collect();

        Ok(ResponseHead {
            version,
            status,
            reason,
            headers,
        })
    }

    /// Declared body length; a non-numeric value counts as absent
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
    }
}

/// Output of one `feed` call
#[derive(Debug, PartialEq, Eq)]
pub struct Step<'a> {
    /// Set on the call that completes the head
    pub head: Option<ResponseHead>,
    /// Body bytes carried by this fragment, surplus already dropped
    pub body: &'a [u8],
    /// The declared length has been satisfied
    pub complete: bool,
}

/// How a response ended at end of stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofOutcome {
    Complete,
    /// The peer closed before `content-length` bytes arrived
    Truncated { expected: usize, received: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body { remaining: Option<usize> },
    Complete,
}

/// Incremental HTTP/1.x response parser
pub struct ResponseParser {
    method: Method,
    max_head_bytes: usize,
    state: State,
    buffer: Vec<u8>,
    scanned: usize,
    received: usize,
}

impl ResponseParser {
    /// Parser for the response to a `method` request
    ///
    /// A head longer than `max_head_bytes` is rejected.
    pub fn new(method: Method, max_head_bytes: usize) -> Self {
        ResponseParser {
            method,
            max_head_bytes,
            state: State::Head,
            buffer: Vec::new(),
            scanned: 0,
            received: 0,
        }
    }

    /// Feed the next fragment of the stream
    pub fn feed<'a>(&'a mut self, data: &'a [u8]) -> Result<Step<'a>> {
        match self.state {
            State::Head => self.feed_head(data),
            State::Body { .. } => {
                let body = self.take_body(data);
                Ok(Step {
                    head: None,
                    body,
                    complete: self.is_complete(),
                })
            }
            State::Complete => Ok(Step {
                head: None,
                body: &[],
                complete: true,
            }),
        }
    }

    fn feed_head<'a>(&'a mut self, data: &[u8]) -> Result<Step<'a>> {
        self.buffer.extend_from_slice(data);

        // A terminator may straddle two fragments
        let start = self.scanned.saturating_sub(TERMINATOR.len() - 1);
        let end = find_terminator(&self.buffer[start..]).map(|pos| start + pos + TERMINATOR.len());
        let limit = end.unwrap_or(self.buffer.len());

        if let Some(pos) = self.buffer[self.scanned..limit]
            .iter()
            .position(|&b| !is_head_byte(b))
        {
            let offset = self.scanned + pos;
            return Err(Error::InvalidHeader(format!(
                "binary byte 0x{:02x} at offset {}",
                self.buffer[offset], offset
            )));
        }

        let Some(end) = end else {
            self.scanned = self.buffer.len();
            if self.buffer.len() > self.max_head_bytes {
                return Err(Error::HeadTooLarge(self.max_head_bytes));
            }
            return Ok(Step {
                head: None,
                body: &[],
                complete: false,
            });
        };
        if end > self.max_head_bytes {
            return Err(Error::HeadTooLarge(self.max_head_bytes));
        }

        let text = std::str::from_utf8(&self.buffer[..end - TERMINATOR.len()])
            .map_err(|e| Error::Parse(e.to_string()))?;
        let head = ResponseHead::parse(text)?;

        let remaining = match self.method {
            Method::Head => None,
            _ => head.content_length(),
        };
        self.state = State::Body { remaining };
        self.scanned = end;

        let available = self.buffer.len() - end;
        let take = self.consume(available);

        Ok(Step {
            head: Some(head),
            body: &self.buffer[end..end + take],
            complete: self.is_complete(),
        })
    }

    fn take_body<'d>(&mut self, data: &'d [u8]) -> &'d [u8] {
        let take = self.consume(data.len());
        &data[..take]
    }

    /// Account for up to `available` body bytes; returns how many count
    fn consume(&mut self, available: usize) -> usize {
        let State::Body { remaining } = self.state else {
            return 0;
        };
        // A HEAD response has no body; stray bytes are dropped until EOF
        if self.method == Method::Head {
            return 0;
        }

        match remaining {
            Some(left) => {
                let take = left.min(available);
                self.received += take;
                self.state = if take == left {
                    State::Complete
                } else {
                    State::Body {
                        remaining: Some(left - take),
                    }
                };
                take
            }
            None => {
                self.received += available;
                available
            }
        }
    }

    /// Signal end of stream
    pub fn on_eof(&mut self) -> Result<EofOutcome> {
        match self.state {
            State::Head => Err(Error::Incomplete),
            State::Body {
                remaining: Some(left),
            } => Ok(EofOutcome::Truncated {
                expected: self.received + left,
                received: self.received,
            }),
            State::Body { remaining: None } | State::Complete => {
                self.state = State::Complete;
                Ok(EofOutcome::Complete)
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// The head has been parsed
    pub fn head_done(&self) -> bool {
        self.state != State::Head
    }

    /// Body bytes accepted so far
    pub fn body_received(&self) -> usize {
        self.received
    }
}
