//! Trusted certificate store
//!
//! The store owns the CA certificates a client trusts plus the caller's
//! bypass policy. Certificates are loaded from DER files in parallel; a
//! successful load publishes an immutable `TrustSnapshot` that handshakes
//! clone out of the store. Reloading or tearing down only swaps the
//! published snapshot, so a verification in flight keeps using the
//! snapshot it started with.

use super::policy::{self, BypassFlags, BYPASS_BANKS};
use super::{CertInfo, Result, TlsError};
use arc_swap::ArcSwapOption;
use foreign_types::ForeignTypeRef;
use openssl::error::ErrorStack;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder, X509StoreRef};
use openssl::x509::{X509, X509Ref, X509StoreContext};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

/// Source of certificate file contents
pub trait AssetLoader: Sync {
    /// Read a whole file; `NotFound` when it does not exist
    fn open_for_read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Loader reading straight from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl AssetLoader for FsLoader {
    fn open_for_read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// One trusted certificate
#[derive(Clone)]
pub struct CertificateEntry {
    pub name: String,
    pub cert: X509,
}

impl std::fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("name", &self.name)
            .field("cert", &CertInfo::from_x509(&self.cert))
            .finish()
    }
}

/// Immutable view of a loaded trust store
pub struct TrustSnapshot {
    entries: Vec<CertificateEntry>,
    store: X509Store,
}

impl TrustSnapshot {
    pub fn entries(&self) -> &[CertificateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared X.509 store, for OCSP response verification
    pub fn x509_store(&self) -> &X509StoreRef {
        &self.store
    }

    /// Fresh store holding the same certificates
    ///
    /// OpenSSL contexts take ownership of their store, so every client
    /// context gets its own copy.
    pub fn build_store(&self) -> std::result::Result<X509Store, ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        for entry in &self.entries {
            builder.add_cert(entry.cert.clone())?;
        }
        Ok(builder.build())
    }
}

/// Trusted certificates plus the verification bypass policy
pub struct CertificateStore {
    snapshot: ArcSwapOption<TrustSnapshot>,
    bypass: [AtomicU64; BYPASS_BANKS],
}

struct Loaded {
    builder: X509StoreBuilder,
    entries: Vec<CertificateEntry>,
}

impl CertificateStore {
    pub fn new() -> Self {
        CertificateStore {
            snapshot: ArcSwapOption::empty(),
            bypass: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    /// Replace the trusted set with the certificates in `listing`
    ///
    /// Each file must hold one DER certificate usable for TLS servers or as
    /// a CA. Files that cannot be read, parsed, confirmed or added are
    /// logged and skipped. Returns the number of certificates now trusted;
    /// zero leaves the store torn down. Failing to create the store itself
    /// is fatal and also leaves it torn down.
    ///
    /// The previous snapshot stays in service while the new one is built,
    /// so connections started during a reload still verify.
    pub fn load_bundle(&self, loader: &dyn AssetLoader, listing: &[PathBuf]) -> Result<usize> {
        let builder = X509StoreBuilder::new().map_err(|e| {
            self.teardown();
            e
        })?;
        let loaded = Mutex::new(Loaded {
            builder,
            entries: Vec::new(),
        });

        if !listing.is_empty() {
            let workers = thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(listing.len());
            let chunk_size = (listing.len() + workers - 1) / workers;

            thread::scope(|scope| {
                for chunk in listing.chunks(chunk_size) {
                    let loaded = &loaded;
                    scope.spawn(move || {
                        for path in chunk {
                            load_one(loader, path, loaded);
                        }
                    });
                }
            });
        }

        let Loaded { builder, mut entries } =
            loaded.into_inner().unwrap_or_else(PoisonError::into_inner);

        if entries.is_empty() {
            warn!(files = listing.len(), "no usable certificates, trust store disabled");
            self.teardown();
            return Ok(0);
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let count = entries.len();
        self.snapshot.store(Some(Arc::new(TrustSnapshot {
            entries,
            store: builder.build(),
        })));

        info!(loaded = count, files = listing.len(), "trust store loaded");
        Ok(count)
    }

    /// Current snapshot, if the store is usable
    pub fn snapshot(&self) -> Option<Arc<TrustSnapshot>> {
        self.snapshot.load_full()
    }

    pub fn is_usable(&self) -> bool {
        self.snapshot.load().is_some()
    }

    /// Drop every certificate; verification fails until the next load
    pub fn teardown(&self) {
        if self.snapshot.swap(None).is_some() {
            debug!("trust store torn down");
        }
    }

    pub fn set_bypass(&self, flags: BypassFlags) {
        for (bank, bits) in self.bypass.iter().zip(flags.banks()) {
            bank.store(bits, Ordering::Release);
        }
    }

    pub fn bypass(&self) -> BypassFlags {
        BypassFlags::from_banks([
            self.bypass[0].load(Ordering::Acquire),
            self.bypass[1].load(Ordering::Acquire),
        ])
    }

    /// Decide whether a raw verification result is acceptable
    pub fn verify_result(&self, code: i32) -> bool {
        let accepted = self.bypass().permits(code);
        if accepted && code != 0 {
            warn!(code, name = policy::error_name(code), "verification error bypassed");
        }
        accepted
    }

    /// Verify a certificate chain offline against the current snapshot
    pub fn verify_chain(&self, leaf: &X509Ref, chain: &[X509]) -> Result<()> {
        let snapshot = self.snapshot().ok_or(TlsError::TrustStoreUnavailable)?;

        let mut untrusted = Stack::new()?;
        for cert in chain {
            untrusted.push(cert.clone())?;
        }

        let mut ctx = X509StoreContext::new()?;
        let (ok, code, reason) = ctx.init(snapshot.x509_store(), leaf, &untrusted, |ctx| {
            let ok = ctx.verify_cert()?;
            let error = ctx.error();
            Ok((ok, error.as_raw(), error.error_string().to_string()))
        })?;

        if ok || self.verify_result(code) {
            Ok(())
        } else {
            Err(TlsError::Verification {
                code,
                name: policy::error_name(code),
                reason,
            })
        }
    }
}

impl Default for CertificateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load_one(loader: &dyn AssetLoader, path: &Path, loaded: &Mutex<Loaded>) {
    let cert = match read_certificate(loader, path) {
        Ok(cert) => cert,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "certificate rejected");
            return;
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut guard = loaded.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = guard.builder.add_cert(cert.clone()) {
        warn!(path = %path.display(), error = %e, "certificate not added to trust store");
        return;
    }
    debug!(path = %path.display(), cert = %CertInfo::from_x509(&cert), "certificate trusted");
    guard.entries.push(CertificateEntry { name, cert });
}

fn read_certificate(loader: &dyn AssetLoader, path: &Path) -> Result<X509> {
    let der = loader.open_for_read(path)?;
    let cert = X509::from_der(&der)
        .map_err(|e| TlsError::Certificate(format!("not a DER certificate: {}", e)))?;

    if !has_server_purpose(&cert) {
        return Err(TlsError::Certificate(
            "not usable for TLS servers or as a CA".to_string(),
        ));
    }
    Ok(cert)
}

mod ffi {
    use libc::{c_int, c_void};

    pub const X509_PURPOSE_SSL_SERVER: c_int = 2;

    extern "C" {
        pub fn X509_check_purpose(x: *mut c_void, id: c_int, ca: c_int) -> c_int;
    }
}

/// Server-certificate or server-CA purpose check
fn has_server_purpose(cert: &X509Ref) -> bool {
    let ptr = cert.as_ptr().cast::<libc::c_void>();
    // SAFETY: `ptr` is a live X509 owned by `cert` for the duration of the
    // calls; X509_check_purpose only caches extension flags on it.
    unsafe {
        ffi::X509_check_purpose(ptr, ffi::X509_PURPOSE_SSL_SERVER, 0) > 0
            || ffi::X509_check_purpose(ptr, ffi::X509_PURPOSE_SSL_SERVER, 1) > 0
    }
}
