//! Certificate verification bypass policy
//!
//! Every X.509 verification error the library can report is mapped to one
//! caller-settable bit in one of two 64-bit banks. A set bit lets the
//! handshake proceed despite that specific error. Codes missing from the
//! table are governed by a single dedicated "unknown error" bit that no
//! tabled code shares.

use std::fmt;

/// Number of 64-bit bypass banks
pub const BYPASS_BANKS: usize = 2;

/// Bank holding the unknown-error gate
pub const UNKNOWN_ERROR_BANK: usize = 1;

/// Mask of the unknown-error gate within its bank
pub const UNKNOWN_ERROR_MASK: u64 = 1 << 63;

/// Static description of one verification error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X509ErrorInfo {
    pub code: i32,
    pub name: &'static str,
    pub bank: usize,
    pub mask: u64,
}

const fn entry(code: i32, name: &'static str, bank: usize, bit: u32) -> X509ErrorInfo {
    X509ErrorInfo {
        code,
        name,
        bank,
        mask: 1 << bit,
    }
}

/// Verification errors with individual bypass bits, sorted by code
pub static X509_ERRORS: [X509ErrorInfo; 71] = [
    entry(2, "X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT", 0, 0),
    entry(3, "X509_V_ERR_UNABLE_TO_GET_CRL", 0, 1),
    entry(4, "X509_V_ERR_UNABLE_TO_DECRYPT_CERT_SIGNATURE", 0, 2),
    entry(5, "X509_V_ERR_UNABLE_TO_DECRYPT_CRL_SIGNATURE", 0, 3),
    entry(6, "X509_V_ERR_UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY", 0, 4),
    entry(7, "X509_V_ERR_CERT_SIGNATURE_FAILURE", 0, 5),
    entry(8, "X509_V_ERR_CRL_SIGNATURE_FAILURE", 0, 6),
    entry(9, "X509_V_ERR_CERT_NOT_YET_VALID", 0, 7),
    entry(10, "X509_V_ERR_CERT_HAS_EXPIRED", 0, 8),
    entry(11, "X509_V_ERR_CRL_NOT_YET_VALID", 0, 9),
    entry(12, "X509_V_ERR_CRL_HAS_EXPIRED", 0, 10),
    entry(13, "X509_V_ERR_ERROR_IN_CERT_NOT_BEFORE_FIELD", 0, 11),
    entry(14, "X509_V_ERR_ERROR_IN_CERT_NOT_AFTER_FIELD", 0, 12),
    entry(15, "X509_V_ERR_ERROR_IN_CRL_LAST_UPDATE_FIELD", 0, 13),
    entry(16, "X509_V_ERR_ERROR_IN_CRL_NEXT_UPDATE_FIELD", 0, 14),
    entry(18, "X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT", 0, 15),
    entry(19, "X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN", 0, 16),
    entry(20, "X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY", 0, 17),
    entry(21, "X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE", 0, 18),
    entry(22, "X509_V_ERR_CERT_CHAIN_TOO_LONG", 0, 19),
    entry(23, "X509_V_ERR_CERT_REVOKED", 0, 20),
    entry(24, "X509_V_ERR_INVALID_CA", 0, 21),
    entry(25, "X509_V_ERR_PATH_LENGTH_EXCEEDED", 0, 22),
    entry(26, "X509_V_ERR_INVALID_PURPOSE", 0, 23),
    entry(27, "X509_V_ERR_CERT_UNTRUSTED", 0, 24),
    entry(28, "X509_V_ERR_CERT_REJECTED", 0, 25),
    entry(29, "X509_V_ERR_SUBJECT_ISSUER_MISMATCH", 0, 26),
    entry(30, "X509_V_ERR_AKID_SKID_MISMATCH", 0, 27),
    entry(31, "X509_V_ERR_AKID_ISSUER_SERIAL_MISMATCH", 0, 28),
    entry(32, "X509_V_ERR_KEYUSAGE_NO_CERTSIGN", 0, 29),
    entry(33, "X509_V_ERR_UNABLE_TO_GET_CRL_ISSUER", 0, 30),
    entry(34, "X509_V_ERR_UNHANDLED_CRITICAL_EXTENSION", 0, 31),
    entry(35, "X509_V_ERR_KEYUSAGE_NO_CRL_SIGN", 0, 32),
    entry(36, "X509_V_ERR_UNHANDLED_CRITICAL_CRL_EXTENSION", 0, 33),
    entry(37, "X509_V_ERR_INVALID_NON_CA", 0, 34),
    entry(38, "X509_V_ERR_PROXY_PATH_LENGTH_EXCEEDED", 0, 35),
    entry(39, "X509_V_ERR_KEYUSAGE_NO_DIGITAL_SIGNATURE", 0, 36),
    entry(40, "X509_V_ERR_PROXY_CERTIFICATES_NOT_ALLOWED", 0, 37),
    entry(41, "X509_V_ERR_INVALID_EXTENSION", 0, 38),
    entry(42, "X509_V_ERR_INVALID_POLICY_EXTENSION", 0, 39),
    entry(43, "X509_V_ERR_NO_EXPLICIT_POLICY", 0, 40),
    entry(44, "X509_V_ERR_DIFFERENT_CRL_SCOPE", 0, 41),
    entry(45, "X509_V_ERR_UNSUPPORTED_EXTENSION_FEATURE", 0, 42),
    entry(46, "X509_V_ERR_UNNESTED_RESOURCE", 0, 43),
    entry(47, "X509_V_ERR_PERMITTED_VIOLATION", 0, 44),
    entry(48, "X509_V_ERR_EXCLUDED_VIOLATION", 0, 45),
    entry(49, "X509_V_ERR_SUBTREE_MINMAX", 0, 46),
    entry(50, "X509_V_ERR_APPLICATION_VERIFICATION", 0, 47),
    entry(51, "X509_V_ERR_UNSUPPORTED_CONSTRAINT_TYPE", 0, 48),
    entry(52, "X509_V_ERR_UNSUPPORTED_CONSTRAINT_SYNTAX", 0, 49),
    entry(53, "X509_V_ERR_UNSUPPORTED_NAME_SYNTAX", 0, 50),
    entry(54, "X509_V_ERR_CRL_PATH_VALIDATION_ERROR", 0, 51),
    entry(55, "X509_V_ERR_PATH_LOOP", 0, 52),
    entry(56, "X509_V_ERR_SUITE_B_INVALID_VERSION", 0, 53),
    entry(57, "X509_V_ERR_SUITE_B_INVALID_ALGORITHM", 0, 54),
    entry(58, "X509_V_ERR_SUITE_B_INVALID_CURVE", 0, 55),
    entry(59, "X509_V_ERR_SUITE_B_INVALID_SIGNATURE_ALGORITHM", 0, 56),
    entry(60, "X509_V_ERR_SUITE_B_LOS_NOT_ALLOWED", 0, 57),
    entry(61, "X509_V_ERR_SUITE_B_CANNOT_SIGN_P_384_WITH_P_256", 0, 58),
    entry(62, "X509_V_ERR_HOSTNAME_MISMATCH", 0, 59),
    entry(63, "X509_V_ERR_EMAIL_MISMATCH", 0, 60),
    entry(64, "X509_V_ERR_IP_ADDRESS_MISMATCH", 0, 61),
    entry(65, "X509_V_ERR_DANE_NO_MATCH", 0, 62),
    entry(66, "X509_V_ERR_EE_KEY_TOO_SMALL", 0, 63),
    entry(67, "X509_V_ERR_CA_KEY_TOO_SMALL", 1, 0),
    entry(68, "X509_V_ERR_CA_MD_TOO_WEAK", 1, 1),
    entry(71, "X509_V_ERR_NO_VALID_SCTS", 1, 2),
    entry(72, "X509_V_ERR_PROXY_SUBJECT_NAME_VIOLATION", 1, 3),
    entry(73, "X509_V_ERR_OCSP_VERIFY_NEEDED", 1, 4),
    entry(74, "X509_V_ERR_OCSP_VERIFY_FAILED", 1, 5),
    entry(75, "X509_V_ERR_OCSP_CERT_UNKNOWN", 1, 6),
];

/// Look up a verification error code
pub fn lookup(code: i32) -> Option<&'static X509ErrorInfo> {
    X509_ERRORS
        .binary_search_by_key(&code, |info| info.code)
        .ok()
        .map(|idx| &X509_ERRORS[idx])
}

/// Symbolic name for a verification error code
pub fn error_name(code: i32) -> &'static str {
    match code {
        0 => "X509_V_OK",
        _ => lookup(code).map_or("X509_V_ERR_UNKNOWN", |info| info.name),
    }
}

/// Set of bypassed verification errors
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BypassFlags {
    banks: [u64; BYPASS_BANKS],
}

impl BypassFlags {
    /// Nothing bypassed
    pub const fn none() -> Self {
        BypassFlags {
            banks: [0; BYPASS_BANKS],
        }
    }

    /// Every tabled error and the unknown-error gate
    pub fn all() -> Self {
        X509_ERRORS
            .iter()
            .fold(Self::none(), |flags, info| flags.allow(info.code))
            .allow_unknown()
    }

    pub const fn from_banks(banks: [u64; BYPASS_BANKS]) -> Self {
        BypassFlags { banks }
    }

    pub const fn banks(&self) -> [u64; BYPASS_BANKS] {
        self.banks
    }

    /// Bypass one tabled error code
    ///
    /// Codes missing from the table are left alone; use `allow_unknown`
    /// to accept those.
    pub fn allow(mut self, code: i32) -> Self {
        if let Some(info) = lookup(code) {
            self.banks[info.bank] |= info.mask;
        }
        self
    }

    /// Accept codes that have no entry in the table
    pub fn allow_unknown(mut self) -> Self {
        self.banks[UNKNOWN_ERROR_BANK] |= UNKNOWN_ERROR_MASK;
        self
    }

    pub fn allows_unknown(&self) -> bool {
        self.banks[UNKNOWN_ERROR_BANK] & UNKNOWN_ERROR_MASK != 0
    }

    /// Decide whether a raw verification result is acceptable
    pub fn permits(&self, code: i32) -> bool {
        if code == 0 {
            return true;
        }
        match lookup(code) {
            Some(info) => self.banks[info.bank] & info.mask != 0,
            None => self.allows_unknown(),
        }
    }
}

impl fmt::Debug for BypassFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BypassFlags({:#018x}, {:#018x})", self.banks[0], self.banks[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_and_unique() {
        for pair in X509_ERRORS.windows(2) {
            assert!(pair[0].code < pair[1].code);
        }
        for (i, a) in X509_ERRORS.iter().enumerate() {
            assert_eq!(a.mask.count_ones(), 1);
            assert!(a.bank < BYPASS_BANKS);
            for b in &X509_ERRORS[i + 1..] {
                assert!(a.bank != b.bank || a.mask != b.mask, "{} shares a bit", a.name);
            }
        }
    }

    #[test]
    fn test_unknown_gate_is_not_a_tabled_bit() {
        for info in X509_ERRORS.iter() {
            assert!(info.bank != UNKNOWN_ERROR_BANK || info.mask != UNKNOWN_ERROR_MASK);
        }
    }

    #[test]
    fn test_each_tabled_code_needs_its_own_bit() {
        for info in X509_ERRORS.iter() {
            let only = BypassFlags::none().allow(info.code);
            assert!(only.permits(info.code));
            assert!(!BypassFlags::none().permits(info.code));
            // Every other tabled code stays rejected
            for other in X509_ERRORS.iter().filter(|o| o.code != info.code) {
                assert!(!only.permits(other.code), "{} leaked into {}", info.name, other.name);
            }
            assert!(!only.permits(9999));
        }
    }

    #[test]
    fn test_unknown_gate_only_covers_untabled_codes() {
        let unknown = BypassFlags::none().allow_unknown();
        assert!(unknown.permits(9999));
        assert!(unknown.permits(17));
        assert!(unknown.permits(-1));
        for info in X509_ERRORS.iter() {
            assert!(!unknown.permits(info.code));
        }
    }

    #[test]
    fn test_allowing_untabled_code_does_not_open_unknown_gate() {
        let flags = BypassFlags::none().allow(9999);
        assert_eq!(flags, BypassFlags::none());
        assert!(!flags.permits(9999));
    }

    #[test]
    fn test_ok_always_permitted() {
        assert!(BypassFlags::none().permits(0));
    }

    #[test]
    fn test_all_and_names() {
        let all = BypassFlags::all();
        assert!(all.permits(10));
        assert!(all.permits(12345));
        assert_eq!(error_name(10), "X509_V_ERR_CERT_HAS_EXPIRED");
        assert_eq!(error_name(62), "X509_V_ERR_HOSTNAME_MISMATCH");
        assert_eq!(error_name(0), "X509_V_OK");
        assert_eq!(error_name(4242), "X509_V_ERR_UNKNOWN");
    }
}
