//! OCSP stapling checks
//!
//! When OCSP is enabled the client asks the server to staple a status
//! response and inspects it from the handshake status callback. A revoked
//! certificate always fails the handshake; `Strict` additionally fails on
//! missing, unsuccessful, unverifiable or unknown responses.

use super::store::TrustSnapshot;
use crate::config::OcspMode;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::ocsp::{OcspCertId, OcspCertStatus, OcspFlag, OcspResponse, OcspResponseStatus};
use openssl::ssl::{SslContextBuilder, SslRef};
use openssl::x509::store::X509StoreRef;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Accepted clock skew on thisUpdate/nextUpdate, in seconds
const VALIDITY_LEEWAY_SECS: u32 = 300;

/// Outcome of inspecting a stapled response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcspVerdict {
    Good,
    Revoked,
    /// The responder does not know the certificate
    Unknown,
    /// No response was stapled
    Missing,
    /// A response was stapled but could not be trusted
    Unverified(String),
}

impl OcspVerdict {
    /// Whether `mode` lets the handshake continue
    pub fn accepted_by(&self, mode: OcspMode) -> bool {
        match (self, mode) {
            (_, OcspMode::Off) => true,
            (OcspVerdict::Good, _) => true,
            (OcspVerdict::Revoked, _) => false,
            (_, OcspMode::Soft) => true,
            (_, OcspMode::Strict) => false,
        }
    }
}

impl fmt::Display for OcspVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcspVerdict::Good => write!(f, "good"),
            OcspVerdict::Revoked => write!(f, "certificate revoked"),
            OcspVerdict::Unknown => write!(f, "certificate unknown to responder"),
            OcspVerdict::Missing => write!(f, "no stapled response"),
            OcspVerdict::Unverified(reason) => write!(f, "unverified response: {}", reason),
        }
    }
}

/// Last verdict reached by a context's status callback
#[derive(Debug, Clone, Default)]
pub struct OcspSlot(Arc<Mutex<Option<OcspVerdict>>>);

impl OcspSlot {
    fn set(&self, verdict: OcspVerdict) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(verdict);
    }

    pub fn take(&self) -> Option<OcspVerdict> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Install the status callback on a client context
pub fn install(
    builder: &mut SslContextBuilder,
    mode: OcspMode,
    snapshot: Arc<TrustSnapshot>,
    slot: OcspSlot,
) -> Result<(), ErrorStack> {
    builder.set_status_callback(move |ssl| {
        let verdict = evaluate(ssl, snapshot.x509_store());
        let accepted = verdict.accepted_by(mode);
        if accepted {
            debug!(%verdict, "OCSP status accepted");
        } else {
            warn!(%verdict, ?mode, "OCSP status rejected");
        }
        slot.set(verdict);
        Ok(accepted)
    })
}

fn evaluate(ssl: &SslRef, store: &X509StoreRef) -> OcspVerdict {
    let Some(der) = ssl.ocsp_status() else {
        return OcspVerdict::Missing;
    };

    match inspect(ssl, der, store) {
        Ok(verdict) => verdict,
        Err(e) => OcspVerdict::Unverified(e.to_string()),
    }
}

fn inspect(ssl: &SslRef, der: &[u8], store: &X509StoreRef) -> Result<OcspVerdict, ErrorStack> {
    let response = OcspResponse::from_der(der)?;
    if response.status() != OcspResponseStatus::SUCCESSFUL {
        return Ok(OcspVerdict::Unverified(format!(
            "responder status {}",
            response.status().as_raw()
        )));
    }
    let basic = response.basic()?;

    let (Some(leaf), Some(chain)) = (ssl.peer_certificate(), ssl.peer_cert_chain()) else {
        return Ok(OcspVerdict::Unverified("no peer chain".to_string()));
    };
    basic.verify(chain, store, OcspFlag::empty())?;

    // The issuer is the chain entry whose subject names the leaf's issuer
    let Some(issuer) = chain.iter().find(|cert| {
        leaf.issuer_name()
            .try_cmp(cert.subject_name())
            .map(|ord| ord.is_eq())
            .unwrap_or(false)
    }) else {
        return Ok(OcspVerdict::Unverified("issuer not in peer chain".to_string()));
    };

    let id = OcspCertId::from_cert(MessageDigest::sha1(), &leaf, issuer)?;
    let Some(status) = basic.find_status(&id) else {
        return Ok(OcspVerdict::Unknown);
    };
    status.check_validity(VALIDITY_LEEWAY_SECS, None)?;

    Ok(match status.status {
        OcspCertStatus::GOOD => OcspVerdict::Good,
        OcspCertStatus::REVOKED => OcspVerdict::Revoked,
        _ => OcspVerdict::Unknown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoked_always_rejected() {
        assert!(!OcspVerdict::Revoked.accepted_by(OcspMode::Soft));
        assert!(!OcspVerdict::Revoked.accepted_by(OcspMode::Strict));
    }

    #[test]
    fn test_soft_tolerates_missing_and_unverified() {
        for verdict in [
            OcspVerdict::Missing,
            OcspVerdict::Unknown,
            OcspVerdict::Unverified("bad signature".to_string()),
        ] {
            assert!(verdict.accepted_by(OcspMode::Soft), "{}", verdict);
            assert!(!verdict.accepted_by(OcspMode::Strict), "{}", verdict);
        }
    }

    #[test]
    fn test_good_accepted_everywhere() {
        assert!(OcspVerdict::Good.accepted_by(OcspMode::Soft));
        assert!(OcspVerdict::Good.accepted_by(OcspMode::Strict));
        assert!(OcspVerdict::Revoked.accepted_by(OcspMode::Off));
    }

    #[test]
    fn test_slot_take_clears() {
        let slot = OcspSlot::default();
        slot.set(OcspVerdict::Missing);
        let shared = slot.clone();
        assert_eq!(shared.take(), Some(OcspVerdict::Missing));
        assert_eq!(slot.take(), None);
    }
}
