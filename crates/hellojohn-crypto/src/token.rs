use crate::b64url_encode;
use rand::RngCore;
use rand::rngs::OsRng;

/// Lower bound on entropy for refresh tokens, session ids and one-shot handles.
pub const MIN_OPAQUE_TOKEN_BYTES: usize = 32;

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate an opaque base64url token with at least 32 bytes of entropy.
///
/// Requests for fewer bytes are raised to [`MIN_OPAQUE_TOKEN_BYTES`].
pub fn opaque_token(len: usize) -> String {
    b64url_encode(&random_bytes(len.max(MIN_OPAQUE_TOKEN_BYTES)))
}

pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_tokens_are_long_and_distinct() {
        let a = opaque_token(32);
        let b = opaque_token(32);
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('.'));
    }

    #[test]
    fn opaque_token_enforces_minimum_entropy() {
        assert_eq!(opaque_token(4).len(), 43);
    }

    #[test]
    fn random_hex_has_requested_width() {
        assert_eq!(random_hex(16).len(), 32);
    }
}
