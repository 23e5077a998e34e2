//! Control-plane entities.
//!
//! # Purpose
//! Records replicated through the cluster log and persisted by the
//! filesystem store: tenants, OAuth clients, scopes, claim definitions and
//! administrators. Signing keys reuse `hellojohn_authz::TenantKeySet`.
//!
//! # Notes
//! Entities refer to each other by name only (clients list scope names,
//! scopes list claim names); nothing is embedded in another record.
pub mod admin;
pub mod client;
pub mod scope;
pub mod tenant;

pub use admin::{AdminRecord, AdminRole};
pub use client::{Client, ClientType};
pub use scope::{ClaimDefinition, ClaimSource, ClaimType, Scope};
pub use tenant::{Tenant, TenantSettings, UserFieldDefinition, UserStoreSettings};

/// Keys become file names, so they are limited to a conservative alphabet.
pub fn validate_key(kind: &str, key: &str) -> Result<(), String> {
    if key.is_empty() || key.len() > 128 {
        return Err(format!("{kind} must be 1-128 characters"));
    }
    if key.starts_with('.') {
        return Err(format!("{kind} must not start with '.'"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
    {
        return Err(format!("{kind} contains unsupported characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_reject_path_tricks() {
        assert!(validate_key("client_id", "web").is_ok());
        assert!(validate_key("scope", "read:things").is_ok());
        assert!(validate_key("client_id", "../etc").is_err());
        assert!(validate_key("client_id", ".hidden").is_err());
        assert!(validate_key("client_id", "a/b").is_err());
        assert!(validate_key("client_id", "").is_err());
    }
}
