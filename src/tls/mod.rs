//! TLS support for outbound connections
//!
//! This module owns everything certificate- and handshake-related:
//!
//! 1. `CertificateStore` holds the trusted certificates (loaded in parallel
//!    from DER files) and the caller's bypass policy
//! 2. `ClientContext` turns settings plus a trust snapshot into an OpenSSL
//!    client context with ciphers, verify parameters and optional OCSP
//! 3. `TlsSessionOps` performs the handshake and implements `SessionOps`
//!    so the connection workers stay transport-agnostic
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use tlswire::tls::{BypassFlags, CertificateStore, FsLoader};
//!
//! let store = CertificateStore::new();
//! let listing = vec![PathBuf::from("/etc/trust/root-a.der")];
//! let loaded = store.load_bundle(&FsLoader, &listing).unwrap();
//! assert!(loaded <= 1);
//!
//! // Tolerate missing CRLs, reject everything else
//! store.set_bypass(BypassFlags::none().allow(3));
//! ```

pub mod builtin_cert;
pub mod cert;
pub mod config;
pub mod ocsp;
pub mod policy;
pub mod session;
pub mod store;

pub use cert::{CertInfo, PeerInfo};
pub use config::{ClientContext, TlsVersion};
pub use policy::{BypassFlags, X509ErrorInfo};
pub use session::TlsSessionOps;
pub use store::{AssetLoader, CertificateEntry, CertificateStore, FsLoader, TrustSnapshot};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Trust store unavailable")]
    TrustStoreUnavailable,

    #[error("Certificate verification failed: {name} ({reason})")]
    Verification {
        code: i32,
        name: &'static str,
        reason: String,
    },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,
}
