use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("seal failed")]
    Seal,
    #[error("open failed: ciphertext rejected")]
    Open,
    #[error("password hash error: {0}")]
    PasswordHash(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            CryptoError::InvalidKey("short".to_string()),
            CryptoError::Encoding("bad".to_string()),
            CryptoError::Seal,
            CryptoError::Open,
            CryptoError::PasswordHash("bad".to_string()),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
