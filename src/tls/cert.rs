//! Certificate diagnostics
//!
//! Subject/issuer extraction for log lines and the `PeerInfo` snapshot a
//! connection records after its handshake. Everything here is best effort:
//! a field that cannot be read is reported as `<undef>`.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::fmt;

const UNDEF: &str = "<undef>";

/// Names extracted from one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Subject common name
    pub subject: String,
    /// Issuer common name
    pub issuer: String,
    /// DNS and IP subject alternative names
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }
}

impl fmt::Display for CertInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject={} issuer={}", self.subject, self.issuer)
    }
}

/// Common name of an X.509 name, or the first entry when CN is absent
pub fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .or_else(|| name.entries().next())
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_else(|| UNDEF.to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(names) = cert.subject_alt_names() else {
        return Vec::new();
    };

    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip = name.ipaddress()?;
            match ip.len() {
                4 => {
                    let octets: [u8; 4] = ip.try_into().ok()?;
                    Some(format!("IP:{}", std::net::Ipv4Addr::from(octets)))
                }
                16 => {
                    let octets: [u8; 16] = ip.try_into().ok()?;
                    Some(format!("IP:{}", std::net::Ipv6Addr::from(octets)))
                }
                _ => None,
            }
        })
        .collect()
}

/// Negotiated session parameters and peer identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Protocol version, e.g. "TLSv1.3"
    pub version: String,
    /// Negotiated cipher name
    pub cipher: String,
    /// Peer certificate, when one was presented
    pub certificate: Option<CertInfo>,
}

impl PeerInfo {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        PeerInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| UNDEF.to_string()),
            certificate: ssl.peer_certificate().map(|cert| CertInfo::from_x509(&cert)),
        }
    }

    pub fn subject(&self) -> &str {
        self.certificate.as_ref().map_or(UNDEF, |c| c.subject.as_str())
    }

    pub fn issuer(&self) -> &str {
        self.certificate.as_ref().map_or(UNDEF, |c| c.issuer.as_str())
    }
}
