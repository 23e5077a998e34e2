use crate::{constant_time_eq, sha256_b64url};

/// Compute the S256 code challenge for a verifier.
pub fn pkce_s256_challenge(verifier: &str) -> String {
    sha256_b64url(verifier)
}

/// Check a PKCE verifier against a stored S256 challenge.
///
/// The comparison is ASCII case-insensitive and constant-time over the
/// normalized values. Empty verifiers never match.
pub fn verify_pkce_s256(verifier: &str, challenge: &str) -> bool {
    if verifier.is_empty() || challenge.is_empty() {
        return false;
    }
    let computed = pkce_s256_challenge(verifier).to_ascii_lowercase();
    let expected = challenge.trim().to_ascii_lowercase();
    constant_time_eq(computed.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B.
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn matches_rfc_vector() {
        assert_eq!(pkce_s256_challenge(RFC_VERIFIER), RFC_CHALLENGE);
        assert!(verify_pkce_s256(RFC_VERIFIER, RFC_CHALLENGE));
    }

    #[test]
    fn comparison_ignores_ascii_case() {
        assert!(verify_pkce_s256(RFC_VERIFIER, &RFC_CHALLENGE.to_ascii_uppercase()));
    }

    #[test]
    fn rejects_wrong_or_empty_verifier() {
        assert!(!verify_pkce_s256("other-verifier", RFC_CHALLENGE));
        assert!(!verify_pkce_s256("", RFC_CHALLENGE));
        assert!(!verify_pkce_s256(RFC_VERIFIER, ""));
    }
}
