//! Cryptographic primitives shared by the hellojohn crates.
//!
//! # Purpose
//! Collects the small, dependency-light building blocks the token engine and
//! the control-plane store rely on: constant-time comparison, AEAD sealing of
//! secrets at rest, SHA-256 digests rendered as base64url, opaque handle
//! generation, PKCE S256 verification, `at_hash` computation and password
//! hashing.
//!
//! # Key invariants
//! - Secrets are compared with [`constant_time_eq`] only.
//! - Sealed values are `base64(nonce || ciphertext || tag)` under AES-256-GCM.
//! - Opaque handles carry at least 32 bytes of OS entropy.
//!
//! # Examples
//! ```rust
//! use hellojohn_crypto::{pkce_s256_challenge, verify_pkce_s256};
//!
//! let challenge = pkce_s256_challenge("verifier-verifier-verifier-verifier-123");
//! assert!(verify_pkce_s256("verifier-verifier-verifier-verifier-123", &challenge));
//! ```
mod digest;
mod errors;
mod password;
mod pkce;
mod secretbox;
mod token;

pub use digest::{at_hash, b64url_decode, b64url_encode, sha256, sha256_b64url, sha256_hex};
pub use errors::{CryptoError, CryptoResult};
pub use password::{hash_password, verify_password};
pub use pkce::{pkce_s256_challenge, verify_pkce_s256};
pub use secretbox::{MasterKey, SecretBox};
pub use token::{opaque_token, random_hex, random_bytes, MIN_OPAQUE_TOKEN_BYTES};

use subtle::ConstantTimeEq;

/// Compare two byte strings without leaking the position of the first mismatch.
///
/// Length differences return `false` immediately; lengths are not secret for
/// any value this crate compares.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_inputs() {
        assert!(constant_time_eq(b"csrf-value", b"csrf-value"));
        assert!(!constant_time_eq(b"csrf-value", b"csrf-valuf"));
        assert!(!constant_time_eq(b"short", b"longer-value"));
        assert!(constant_time_eq(b"", b""));
    }
}
