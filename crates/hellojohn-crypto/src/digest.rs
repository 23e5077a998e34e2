use crate::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of `value` rendered as unpadded base64url.
///
/// This is the storage form of refresh-token, session and handle hashes.
pub fn sha256_b64url(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(sha256(value.as_bytes()))
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(value: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|err| CryptoError::Encoding(err.to_string()))
}

/// OIDC `at_hash`: base64url of the leftmost 128 bits of SHA-256(access token).
pub fn at_hash(access_token: &str) -> String {
    let digest = sha256(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_b64url_is_stable_and_unpadded() {
        let a = sha256_b64url("refresh-token");
        let b = sha256_b64url("refresh-token");
        assert_eq!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
        assert_ne!(a, sha256_b64url("refresh-token2"));
    }

    #[test]
    fn at_hash_uses_left_half_of_digest() {
        let token = "header.payload.signature";
        let expected = URL_SAFE_NO_PAD.encode(&sha256(token.as_bytes())[..16]);
        assert_eq!(at_hash(token), expected);
        assert_eq!(at_hash(token).len(), 22);
    }

    #[test]
    fn b64url_decode_tolerates_padding() {
        let encoded = b64url_encode(b"hi");
        assert_eq!(b64url_decode(&encoded).expect("decode"), b"hi");
        assert_eq!(b64url_decode("aGk=").expect("decode padded"), b"hi");
        assert!(b64url_decode("***").is_err());
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
