//! Control-plane store.
//!
//! # Purpose
//! Holds tenants, clients, scopes, claim definitions, signing-key sets and
//! administrators. The only writer is the cluster log: commands are applied
//! in index order through [`FsStore`]'s `StateMachineBackend` impl, and every
//! reader sees the local, already-applied copy.
//!
//! # Optimistic concurrency
//! Every record carries an ETag (SHA-256 hex of its compact JSON form).
//! Mutations may name the ETag they expect; `*` accepts any existing or
//! missing record.
use hellojohn_authz::SigningKeyRecord;
use hellojohn_consensus::{CommandKind, RejectReason};
use hellojohn_crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fs;

pub use fs::FsStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("store degraded: {0}")]
    Degraded(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            StoreError::NotFound(_) => RejectReason::NotFound,
            StoreError::Conflict(_) => RejectReason::Conflict,
            StoreError::PreconditionFailed(_) => RejectReason::PreconditionFailed,
            StoreError::Invalid(_) | StoreError::Unexpected(_) => RejectReason::Invalid,
            StoreError::Degraded(_) => RejectReason::Degraded,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A record together with its current ETag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: String,
}

impl<T: Serialize> Versioned<T> {
    pub fn new(value: T) -> StoreResult<Self> {
        let etag = etag_for(&value)?;
        Ok(Self { value, etag })
    }
}

pub fn etag_for<T: Serialize>(value: &T) -> StoreResult<String> {
    let bytes = serde_json::to_vec(value).map_err(|err| StoreError::Unexpected(err.into()))?;
    Ok(sha256_hex(&bytes))
}

/// Strip the weak marker and quotes an HTTP client may send.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string()
}

pub fn check_if_match(current: Option<&str>, if_match: Option<&str>) -> StoreResult<()> {
    let Some(expected) = if_match else {
        return Ok(());
    };
    if expected == "*" {
        return Ok(());
    }
    match current {
        Some(etag) if etag == normalize_etag(expected) => Ok(()),
        Some(_) => Err(StoreError::PreconditionFailed("etag mismatch".to_string())),
        None => Err(StoreError::PreconditionFailed(
            "record does not exist".to_string(),
        )),
    }
}

/// Emitted after each applied command, on every node.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyEvent {
    pub index: u64,
    /// `None` when a snapshot replaced the whole state.
    pub kind: Option<CommandKind>,
    pub tenant: Option<String>,
}

/// Payload of `RotateKeys`. The leader generates and seals the key so every
/// node applies identical material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKeysPayload {
    pub key: SigningKeyRecord,
    #[serde(default)]
    pub grace_seconds: i64,
    /// Install only if the tenant has no active key.
    #[serde(default)]
    pub initial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_match_semantics() {
        assert!(check_if_match(None, None).is_ok());
        assert!(check_if_match(Some("abc"), None).is_ok());
        assert!(check_if_match(None, Some("*")).is_ok());
        assert!(check_if_match(Some("abc"), Some("*")).is_ok());
        assert!(check_if_match(Some("abc"), Some("\"abc\"")).is_ok());
        assert!(check_if_match(Some("abc"), Some("W/\"abc\"")).is_ok());
        assert!(matches!(
            check_if_match(Some("abc"), Some("def")),
            Err(StoreError::PreconditionFailed(_))
        ));
        assert!(matches!(
            check_if_match(None, Some("def")),
            Err(StoreError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn etags_follow_content() {
        let a = etag_for(&serde_json::json!({"a": 1})).expect("etag");
        let b = etag_for(&serde_json::json!({"a": 1})).expect("etag");
        let c = etag_for(&serde_json::json!({"a": 2})).expect("etag");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
