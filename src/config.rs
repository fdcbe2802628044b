//! Connection settings
//!
//! Read-only configuration shared by every connection created from a
//! registry: cipher material, socket timeouts, buffer sizes, the default
//! user agent and the OCSP policy. Settings can be built in code or loaded
//! from TOML; `validate` reports every out-of-range value at once.

use crate::tls::TlsVersion;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Smallest accepted RX/TX buffer size
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Largest accepted RX/TX buffer size
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Largest accepted socket timeout, in seconds
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single out-of-range setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// OCSP revocation checking during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcspMode {
    /// No status request is sent
    #[default]
    Off,
    /// A revoked response fails the handshake; missing or unverifiable
    /// responses are tolerated
    Soft,
    /// Anything but a verified "good" response fails the handshake
    Strict,
}

/// Settings applied to every connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Cipher list for TLS 1.2 and below
    pub cipher_list: String,
    /// Cipher suites for TLS 1.3
    pub ciphersuites: String,
    /// Lowest protocol version offered
    pub min_tls_version: TlsVersion,
    /// Receive timeout; 0 disables it
    pub rx_timeout_secs: u64,
    /// Send timeout; 0 disables it
    pub tx_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub rx_buffer_size: usize,
    pub tx_buffer_size: usize,
    pub user_agent: String,
    pub ocsp: OcspMode,
    /// Upper bound on an HTTP response head
    pub max_header_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            cipher_list: "HIGH:!aNULL:!MD5:!RC4".to_string(),
            ciphersuites:
                "TLS_AES_256_GCM_SHA384:TLS_CHACHA20_POLY1305_SHA256:TLS_AES_128_GCM_SHA256"
                    .to_string(),
            min_tls_version: TlsVersion::Tls12,
            rx_timeout_secs: 30,
            tx_timeout_secs: 30,
            connect_timeout_secs: 15,
            rx_buffer_size: 64 * 1024,
            tx_buffer_size: 64 * 1024,
            user_agent: concat!("tlswire/", env!("CARGO_PKG_VERSION")).to_string(),
            ocsp: OcspMode::Off,
            max_header_bytes: 64 * 1024,
        }
    }
}

impl ConnectionSettings {
    /// Parse and validate settings from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: ConnectionSettings = toml::from_str(content)?;
        settings.validate().map_err(ConfigError::Validation)?;
        Ok(settings)
    }

    /// Load and validate settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check every value against its accepted range
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("rx_timeout_secs", self.rx_timeout_secs),
            ("tx_timeout_secs", self.tx_timeout_secs),
        ] {
            if value > MAX_TIMEOUT_SECS {
                errors.push(ValidationError {
                    field,
                    message: format!("{} exceeds {} seconds", value, MAX_TIMEOUT_SECS),
                });
            }
        }

        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > MAX_TIMEOUT_SECS {
            errors.push(ValidationError {
                field: "connect_timeout_secs",
                message: format!("{} not in 1..={}", self.connect_timeout_secs, MAX_TIMEOUT_SECS),
            });
        }

        for (field, value) in [
            ("rx_buffer_size", self.rx_buffer_size),
            ("tx_buffer_size", self.tx_buffer_size),
        ] {
            if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&value) {
                errors.push(ValidationError {
                    field,
                    message: format!(
                        "{} not in {}..={}",
                        value, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
                    ),
                });
            }
        }

        if !(1024..=MAX_BUFFER_SIZE).contains(&self.max_header_bytes) {
            errors.push(ValidationError {
                field: "max_header_bytes",
                message: format!("{} not in 1024..={}", self.max_header_bytes, MAX_BUFFER_SIZE),
            });
        }

        if self.cipher_list.trim().is_empty() && self.ciphersuites.trim().is_empty() {
            errors.push(ValidationError {
                field: "cipher_list",
                message: "no cipher material configured".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn rx_timeout(&self) -> Option<Duration> {
        secs_or_none(self.rx_timeout_secs)
    }

    pub fn tx_timeout(&self) -> Option<Duration> {
        secs_or_none(self.tx_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
