//! TLS session operations
//!
//! Client handshake plus the `SessionOps` implementation the connection
//! workers use for encrypted I/O.

use super::cert::PeerInfo;
use super::config::ClientContext;
use super::policy;
use super::TlsError;
use crate::config::OcspMode;
use crate::net::session::SessionOps;
use openssl::ssl::{HandshakeError, Ssl, SslStream, SslVerifyMode, StatusType};
use openssl::x509::verify::{X509CheckFlags, X509VerifyFlags};
use openssl::x509::X509PurposeId;
use std::io::{self, Read, Write};
use std::net::{IpAddr, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// First verification error the bypass policy refused
#[derive(Debug, Clone)]
struct Rejection {
    code: i32,
    reason: String,
}

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` over a connected TCP stream.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    peer: PeerInfo,
    failed: bool,
}

impl TlsSessionOps {
    /// Perform the client handshake and verify the peer
    ///
    /// `host` is sent as SNI (unless it is an IP literal) and checked
    /// against the certificate subject. Every verification error is run
    /// through the store's bypass policy; the first refused error is the
    /// one reported.
    pub fn connect(tcp: TcpStream, context: &ClientContext, host: &str) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&context.ctx)?;
        let ip = host.parse::<IpAddr>().ok();

        if ip.is_none() {
            ssl.set_hostname(host)?;
        }

        let param = ssl.param_mut();
        param.set_flags(X509VerifyFlags::CRL_CHECK | X509VerifyFlags::X509_STRICT)?;
        param.set_hostflags(X509CheckFlags::ALWAYS_CHECK_SUBJECT);
        param.set_purpose(X509PurposeId::SSL_SERVER)?;
        match ip {
            Some(ip) => param.set_ip(ip)?,
            None => param.set_host(host)?,
        }

        if context.ocsp != OcspMode::Off {
            ssl.set_status_type(StatusType::OCSP)?;
        }

        let rejection: Arc<Mutex<Option<Rejection>>> = Arc::default();
        let verdict_slot = Arc::clone(&rejection);
        let store = Arc::clone(&context.store);
        ssl.set_verify_callback(SslVerifyMode::PEER, move |preverified, ctx| {
            if preverified {
                return true;
            }
            let error = ctx.error();
            if store.verify_result(error.as_raw()) {
                return true;
            }
            let mut slot = verdict_slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert_with(|| Rejection {
                code: error.as_raw(),
                reason: error.error_string().to_string(),
            });
            false
        });

        let stream = match ssl.connect(tcp) {
            Ok(stream) => stream,
            Err(HandshakeError::SetupFailure(e)) => return Err(TlsError::OpenSsl(e)),
            Err(HandshakeError::WouldBlock(_)) => return Err(TlsError::HandshakeTimeout),
            Err(HandshakeError::Failure(mid)) => {
                let rejected = rejection.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(Rejection { code, reason }) = rejected {
                    return Err(TlsError::Verification {
                        code,
                        name: policy::error_name(code),
                        reason,
                    });
                }
                if let Some(verdict) = context.ocsp_verdict.take() {
                    if !verdict.accepted_by(context.ocsp) {
                        return Err(TlsError::HandshakeFailed(format!("OCSP: {}", verdict)));
                    }
                }
                return Err(TlsError::HandshakeFailed(mid.error().to_string()));
            }
        };

        let result = stream.ssl().verify_result();
        if !context.store.verify_result(result.as_raw()) {
            return Err(TlsError::Verification {
                code: result.as_raw(),
                name: policy::error_name(result.as_raw()),
                reason: result.error_string().to_string(),
            });
        }

        let peer = PeerInfo::from_ssl(stream.ssl());
        info!(
            host,
            version = %peer.version,
            cipher = %peer.cipher,
            subject = peer.subject(),
            issuer = peer.issuer(),
            "TLS session established"
        );

        Ok(TlsSessionOps {
            stream,
            peer,
            failed: false,
        })
    }

    /// Negotiated parameters and peer identity
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Whether an I/O operation has failed on this session
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl SessionOps for TlsSessionOps {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream.read(buf);
        if let Err(e) = &result {
            if !is_retry(e) {
                self.failed = true;
            }
        }
        result
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream.write(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn close(&mut self) -> io::Result<()> {
        // close_notify only on a healthy session
        if !self.failed {
            if let Err(e) = self.stream.shutdown() {
                debug!(error = %e, "TLS shutdown incomplete");
            }
        }
        crate::net::session::shutdown_stream(self.stream.get_ref())
    }

    fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}

fn is_retry(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
