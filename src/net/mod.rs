//! Connection engine
//!
//! A `Connection` drives one outbound TCP (optionally TLS) connection with
//! two OS threads:
//!
//! - the reader resolves, connects, performs the handshake and then either
//!   runs the raw read loop or the HTTP exchange
//! - the writer (raw mode only) sleeps on a condition variable until the
//!   caller enqueues data, then drains the TX queue in order
//!
//! The caller only ever touches thread-safe accessors: it pushes TX
//! packets, pops RX packets, inspects state and may disconnect at any time.
//! Failures inside the workers are recorded on the connection and reported
//! through the `EventSink`; only misuse by the caller fails synchronously.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tlswire::config::ConnectionSettings;
//! use tlswire::net::{ConnectionEnv, ConnectionRegistry, Target};
//! use tlswire::tls::CertificateStore;
//!
//! let env = ConnectionEnv::new(
//!     Arc::new(ConnectionSettings::default()),
//!     Arc::new(CertificateStore::new()),
//! );
//! let registry = ConnectionRegistry::new(env);
//!
//! let conn = registry.create();
//! conn.connect(Target::plain("127.0.0.1", 7000)).unwrap();
//! conn.send(&b"ping"[..]).unwrap();
//! conn.wait_standby(Some(Duration::from_secs(5)));
//! println!("received {:?}", conn.recv_all());
//! ```

pub mod connection;
pub mod events;
pub mod queue;
pub mod registry;
pub mod session;
pub mod state;
mod worker;

pub use connection::{Connection, ConnectionEnv, LastError, Target, Timestamps, TrafficStats};
pub use events::{ChannelSink, EventSink, Notification, NullSink};
pub use queue::{Packet, PacketQueue};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use session::{FdSessionOps, SessionOps};
pub use state::{ClosedBy, ConnectionEvent, ConnectionState, HttpStage, Phase, StopReason};

use crate::tls::TlsError;
use std::io;

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Raw code reported when no usable trust store exists
const X509_V_ERR_UNSPECIFIED: i32 = 1;

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Certificate verification failed: {name} ({reason})")]
    Verification {
        code: i32,
        name: &'static str,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out")]
    Timeout,

    #[error("Short write: {written} of {requested} bytes")]
    ShortWrite { requested: usize, written: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::http::Error),

    #[error("Aborted")]
    Aborted,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Queue is empty")]
    QueueEmpty,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Stable numeric code for the error kind
    pub fn code(&self) -> i32 {
        match self {
            Error::Resolve { .. } => 1,
            Error::Connect { .. } => 2,
            Error::Verification { .. } => 3,
            Error::Tls(_) => 4,
            Error::Io(_) => 5,
            Error::Timeout => 6,
            Error::ShortWrite { .. } => 7,
            Error::Protocol(_) => 8,
            Error::Aborted => 9,
            Error::InvalidState(_) => 10,
            Error::QueueEmpty => 11,
            Error::Config(_) => 12,
        }
    }
}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        match e {
            TlsError::Verification { code, name, reason } => {
                Error::Verification { code, name, reason }
            }
            TlsError::TrustStoreUnavailable => Error::Verification {
                code: X509_V_ERR_UNSPECIFIED,
                name: "X509_V_ERR_UNSPECIFIED",
                reason: "no usable trust store".to_string(),
            },
            TlsError::HandshakeTimeout => Error::Timeout,
            TlsError::Io(e) => Error::Io(e),
            other => Error::Tls(other),
        }
    }
}
