//! TLS client context construction
//!
//! A `ClientContext` is built once per connection attempt from the shared
//! settings and the trust snapshot current at that moment. It carries the
//! cipher material, protocol floor, a private copy of the trusted
//! certificates and, when enabled, the OCSP status callback.

use super::ocsp::{self, OcspSlot};
use super::store::CertificateStore;
use super::{Result, TlsError};
use crate::config::{ConnectionSettings, OcspMode};
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> std::result::Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl TryFrom<String> for TlsVersion {
    type Error = TlsError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        TlsVersion::from_str(&s)
    }
}

/// Per-attempt client context
#[derive(Clone)]
pub struct ClientContext {
    pub(crate) ctx: SslContext,
    pub(crate) store: Arc<CertificateStore>,
    pub(crate) ocsp: OcspMode,
    pub(crate) ocsp_verdict: OcspSlot,
}

impl ClientContext {
    /// Build a context trusting the store's current snapshot
    ///
    /// Fails with `TrustStoreUnavailable` when the store holds no usable
    /// certificates, and with the OpenSSL error when the context or the
    /// cipher configuration is rejected.
    pub fn build(settings: &ConnectionSettings, store: &Arc<CertificateStore>) -> Result<Self> {
        let snapshot = store.snapshot().ok_or(TlsError::TrustStoreUnavailable)?;

        // Partial writes stay off here, so one write never goes out split
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(settings.min_tls_version.to_openssl_version()))?;

        if !settings.cipher_list.trim().is_empty() {
            builder.set_cipher_list(&settings.cipher_list)?;
        }
        if !settings.ciphersuites.trim().is_empty() {
            builder.set_ciphersuites(&settings.ciphersuites)?;
        }

        builder.set_verify(SslVerifyMode::PEER);
        builder.set_cert_store(snapshot.build_store()?);

        let ocsp_verdict = OcspSlot::default();
        if settings.ocsp != OcspMode::Off {
            ocsp::install(&mut builder, settings.ocsp, snapshot.clone(), ocsp_verdict.clone())?;
        }

        debug!(
            trusted = snapshot.len(),
            min_version = settings.min_tls_version.as_str(),
            ocsp = ?settings.ocsp,
            "client context built"
        );

        Ok(ClientContext {
            ctx: builder.build(),
            store: Arc::clone(store),
            ocsp: settings.ocsp,
            ocsp_verdict,
        })
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::builtin_cert::builtin_cert_der;
    use crate::tls::store::AssetLoader;
    use std::path::{Path, PathBuf};

    struct OneCert;

    impl AssetLoader for OneCert {
        fn open_for_read(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            builtin_cert_der().map_err(std::io::Error::other)
        }
    }

    fn loaded_store() -> Arc<CertificateStore> {
        let store = Arc::new(CertificateStore::new());
        store.load_bundle(&OneCert, &[PathBuf::from("ca.der")]).unwrap();
        store
    }

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!(TlsVersion::from_str("TLSv1.2").unwrap(), TlsVersion::Tls12);
        assert_eq!(TlsVersion::from_str("tlsv1.3").unwrap(), TlsVersion::Tls13);
        assert_eq!(TlsVersion::from_str("TLS1.0").unwrap(), TlsVersion::Tls10);
        assert!(TlsVersion::from_str("SSLv3").is_err());
        assert!(TlsVersion::Tls12 < TlsVersion::Tls13);
    }

    #[test]
    fn test_build_requires_usable_store() {
        let store = Arc::new(CertificateStore::new());
        let result = ClientContext::build(&ConnectionSettings::default(), &store);
        assert!(matches!(result, Err(TlsError::TrustStoreUnavailable)));
    }

    #[test]
    fn test_build_with_defaults() {
        let store = loaded_store();
        let ctx = ClientContext::build(&ConnectionSettings::default(), &store).unwrap();
        assert_eq!(ctx.ocsp, OcspMode::Off);
        assert!(Arc::ptr_eq(ctx.store(), &store));
    }

    #[test]
    fn test_bad_cipher_list_fails_fast() {
        let settings = ConnectionSettings {
            cipher_list: "NOT-A-CIPHER".to_string(),
            ..ConnectionSettings::default()
        };
        let result = ClientContext::build(&settings, &loaded_store());
        assert!(matches!(result, Err(TlsError::OpenSsl(_))));
    }

    #[test]
    fn test_build_with_ocsp() {
        let settings = ConnectionSettings {
            ocsp: OcspMode::Strict,
            ..ConnectionSettings::default()
        };
        let ctx = ClientContext::build(&settings, &loaded_store()).unwrap();
        assert_eq!(ctx.ocsp, OcspMode::Strict);
        assert!(ctx.ocsp_verdict.take().is_none());
    }
}
