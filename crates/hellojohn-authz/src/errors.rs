use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token header is missing kid")]
    MissingKid,
    #[error("token type mismatch: expected {expected}, got {actual}")]
    WrongTokenUse { expected: String, actual: String },
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("key {kid} not found for tenant {tenant}")]
    KeyNotFound { tenant: String, kid: String },
    #[error("missing signing key for tenant {0}")]
    MissingSigningKey(String),
    #[error("unknown tenant {0}")]
    UnknownTenant(String),
    #[error("the active key {0} cannot be revoked; rotate first")]
    ActiveKeyRevocation(String),
    #[error("invalid key set: {0}")]
    InvalidKeySet(String),
    #[error("key material error: {0}")]
    Key(String),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token issued in the future")]
    IssuedInFuture,
    #[error("claims tenant mismatch: expected {expected}, got {actual}")]
    TenantMismatch { expected: String, actual: String },
    #[error("crypto error: {0}")]
    Crypto(#[from] hellojohn_crypto::CryptoError),
    #[error("policy error: {0}")]
    Policy(String),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            AuthzError::UnsupportedAlgorithm("HS256".to_string()),
            AuthzError::MissingKid,
            AuthzError::KeyNotFound {
                tenant: "acme".to_string(),
                kid: "k1".to_string(),
            },
            AuthzError::MissingSigningKey("acme".to_string()),
            AuthzError::ActiveKeyRevocation("k1".to_string()),
            AuthzError::TenantMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
            AuthzError::IssuedInFuture,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
