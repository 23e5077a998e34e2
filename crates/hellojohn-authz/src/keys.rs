//! Per-tenant signing-key sets.
//!
//! # Purpose
//! Models the lifecycle of a tenant's Ed25519 signing keys: initial
//! generation, rotation with a grace window, explicit revocation, resolution
//! by `kid` for verification, and JWKS export.
//!
//! # Key invariants
//! - At most one key is `active`; it is the only key with private material.
//! - Rotation demotes the previous active key to `retiring` with
//!   `retired_at = now + grace` and drops its sealed private key.
//! - A `retiring` key verifies while `retired_at >= now`; once lapsed it is
//!   pruned on the next mutation and excluded from JWKS immediately.
//!
//! # Determinism
//! Every mutation takes `now` from the caller. The replicated log supplies
//! the command's logical timestamp so all nodes compute identical key sets.
use crate::jwks::{Jwk, Jwks};
use crate::{AuthzError, AuthzResult};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use hellojohn_crypto::{SecretBox, b64url_decode, b64url_encode, random_bytes, random_hex};
use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Retiring,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub kid: String,
    pub alg: String,
    pub created_at: i64,
    pub activated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<i64>,
    pub status: KeyStatus,
    /// Sealed 32-byte Ed25519 seed; present only while the key is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_sealed: Option<String>,
    /// Raw public key, base64url (the JWK `x` member).
    pub public_key: String,
}

impl SigningKeyRecord {
    /// Whether the key may verify signatures at `now`.
    pub fn verifies_at(&self, now: i64) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Retiring => self.retired_at.is_some_and(|retired| retired >= now),
            KeyStatus::Revoked => false,
        }
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk::ed25519(self.kid.clone(), self.public_key.clone())
    }

    /// Copy without private material, for admin listings.
    pub fn public_view(&self) -> Self {
        Self {
            private_key_sealed: None,
            ..self.clone()
        }
    }
}

/// Generate a fresh active Ed25519 key with its seed sealed under `sealer`.
pub fn generate_signing_key(sealer: &SecretBox, now: i64) -> AuthzResult<SigningKeyRecord> {
    let seed: [u8; 32] = random_bytes(32)
        .try_into()
        .map_err(|_| AuthzError::Key("seed length".to_string()))?;
    let signing_key = Ed25519SigningKey::from_bytes(&seed);
    let public_key = b64url_encode(&signing_key.verifying_key().to_bytes());
    let kid = random_hex(16);
    Ok(SigningKeyRecord {
        kid,
        alg: "EdDSA".to_string(),
        created_at: now,
        activated_at: now,
        retired_at: None,
        status: KeyStatus::Active,
        private_key_sealed: Some(sealer.seal(&seed)?),
        public_key,
    })
}

/// Decrypt an active key's seed into a jsonwebtoken encoding key.
pub fn signing_material(record: &SigningKeyRecord, sealer: &SecretBox) -> AuthzResult<EncodingKey> {
    if record.status != KeyStatus::Active {
        return Err(AuthzError::Key(format!("key {} is not active", record.kid)));
    }
    let sealed = record
        .private_key_sealed
        .as_deref()
        .ok_or_else(|| AuthzError::Key(format!("key {} has no private material", record.kid)))?;
    let seed: [u8; 32] = sealer
        .open(sealed)?
        .try_into()
        .map_err(|_| AuthzError::Key("sealed seed is not 32 bytes".to_string()))?;
    let der = Ed25519SigningKey::from_bytes(&seed)
        .to_pkcs8_der()
        .map_err(|err| AuthzError::Key(format!("encode Ed25519 key: {err}")))?;
    Ok(EncodingKey::from_ed_der(der.as_bytes()))
}

pub fn verification_material(record: &SigningKeyRecord) -> AuthzResult<DecodingKey> {
    let raw = b64url_decode(&record.public_key)?;
    if raw.len() != 32 {
        return Err(AuthzError::Key(format!(
            "public key for {} has {} bytes",
            record.kid,
            raw.len()
        )));
    }
    Ok(DecodingKey::from_ed_components(&record.public_key)?)
}

/// All signing keys owned by one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantKeySet {
    pub keys: Vec<SigningKeyRecord>,
}

impl TenantKeySet {
    pub fn active(&self) -> Option<&SigningKeyRecord> {
        self.keys.iter().find(|key| key.status == KeyStatus::Active)
    }

    /// Install `key` as active if the set has none. Returns whether it did.
    pub fn generate_initial(&mut self, key: SigningKeyRecord) -> AuthzResult<bool> {
        if self.active().is_some() {
            return Ok(false);
        }
        Self::check_new_key(&key)?;
        self.keys.push(key);
        Ok(true)
    }

    /// Demote the active key to `retiring` and activate `key`.
    pub fn rotate(
        &mut self,
        key: SigningKeyRecord,
        grace_seconds: i64,
        now: i64,
    ) -> AuthzResult<String> {
        Self::check_new_key(&key)?;
        if self.keys.iter().any(|existing| existing.kid == key.kid) {
            return Err(AuthzError::InvalidKeySet(format!("duplicate kid {}", key.kid)));
        }
        let retire_at = now.saturating_add(grace_seconds.max(0));
        for existing in self
            .keys
            .iter_mut()
            .filter(|existing| existing.status == KeyStatus::Active)
        {
            existing.status = KeyStatus::Retiring;
            existing.retired_at = Some(retire_at);
            existing.private_key_sealed = None;
        }
        let kid = key.kid.clone();
        self.keys.push(key);
        self.prune(now);
        Ok(kid)
    }

    /// Mark a non-active key revoked. Revoking the active key is refused.
    pub fn revoke(&mut self, kid: &str, now: i64) -> AuthzResult<()> {
        let key = self
            .keys
            .iter_mut()
            .find(|key| key.kid == kid)
            .ok_or_else(|| AuthzError::KeyNotFound {
                tenant: String::new(),
                kid: kid.to_string(),
            })?;
        if key.status == KeyStatus::Active {
            return Err(AuthzError::ActiveKeyRevocation(kid.to_string()));
        }
        key.status = KeyStatus::Revoked;
        key.retired_at = Some(key.retired_at.map_or(now, |at| at.min(now)));
        key.private_key_sealed = None;
        self.prune(now);
        Ok(())
    }

    pub fn resolve(&self, kid: &str, now: i64) -> Option<&SigningKeyRecord> {
        self.keys
            .iter()
            .find(|key| key.kid == kid && key.verifies_at(now))
    }

    /// Public JWKS for every key that verifies at `now`, sorted by `kid`.
    pub fn jwks(&self, now: i64) -> Jwks {
        Jwks {
            keys: self
                .keys
                .iter()
                .filter(|key| key.verifies_at(now))
                .map(SigningKeyRecord::to_jwk)
                .collect(),
        }
        .normalized()
    }

    pub fn validate(&self) -> AuthzResult<()> {
        let active = self
            .keys
            .iter()
            .filter(|key| key.status == KeyStatus::Active)
            .count();
        if active > 1 {
            return Err(AuthzError::InvalidKeySet(format!(
                "{active} active keys"
            )));
        }
        if let Some(key) = self
            .keys
            .iter()
            .find(|key| key.status != KeyStatus::Active && key.private_key_sealed.is_some())
        {
            return Err(AuthzError::InvalidKeySet(format!(
                "non-active key {} retains private material",
                key.kid
            )));
        }
        Ok(())
    }

    /// Drop retiring keys whose grace window has lapsed.
    fn prune(&mut self, now: i64) {
        self.keys.retain(|key| {
            key.status != KeyStatus::Retiring || key.retired_at.is_some_and(|at| at >= now)
        });
    }

    fn check_new_key(key: &SigningKeyRecord) -> AuthzResult<()> {
        if key.status != KeyStatus::Active || key.private_key_sealed.is_none() {
            return Err(AuthzError::InvalidKeySet(format!(
                "new key {} must be active with private material",
                key.kid
            )));
        }
        if key.alg != "EdDSA" {
            return Err(AuthzError::UnsupportedAlgorithm(key.alg.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hellojohn_crypto::MasterKey;

    fn sealer() -> SecretBox {
        SecretBox::new(MasterKey::from_bytes([9u8; 32]))
    }

    #[test]
    fn generate_initial_is_idempotent() {
        let sb = sealer();
        let mut set = TenantKeySet::default();
        assert!(set.generate_initial(generate_signing_key(&sb, 100).expect("key")).expect("init"));
        assert!(!set.generate_initial(generate_signing_key(&sb, 101).expect("key")).expect("init"));
        assert_eq!(set.keys.len(), 1);
        set.validate().expect("valid");
    }

    #[test]
    fn rotate_demotes_previous_with_grace() {
        let sb = sealer();
        let mut set = TenantKeySet::default();
        let first = generate_signing_key(&sb, 100).expect("key");
        let first_kid = first.kid.clone();
        set.generate_initial(first).expect("init");

        let new_kid = set
            .rotate(generate_signing_key(&sb, 200).expect("key"), 60, 200)
            .expect("rotate");

        assert_eq!(set.active().map(|key| key.kid.as_str()), Some(new_kid.as_str()));
        let old = set.resolve(&first_kid, 260).expect("old key in grace");
        assert_eq!(old.status, KeyStatus::Retiring);
        assert_eq!(old.retired_at, Some(260));
        assert!(old.private_key_sealed.is_none());
        assert!(set.resolve(&first_kid, 261).is_none());
        set.validate().expect("valid");
    }

    #[test]
    fn jwks_excludes_lapsed_and_revoked_keys() {
        let sb = sealer();
        let mut set = TenantKeySet::default();
        set.generate_initial(generate_signing_key(&sb, 0).expect("key")).expect("init");
        let k1 = set.active().expect("active").kid.clone();
        set.rotate(generate_signing_key(&sb, 10).expect("key"), 5, 10)
            .expect("rotate");
        assert_eq!(set.jwks(12).keys.len(), 2);
        assert_eq!(set.jwks(16).keys.len(), 1);

        set.rotate(generate_signing_key(&sb, 20).expect("key"), 100, 20)
            .expect("rotate");
        assert!(set.keys.iter().all(|key| key.kid != k1), "lapsed key pruned");
        let retiring = set
            .keys
            .iter()
            .find(|key| key.status == KeyStatus::Retiring)
            .expect("retiring")
            .kid
            .clone();
        set.revoke(&retiring, 21).expect("revoke");
        assert_eq!(set.jwks(21).keys.len(), 1);
    }

    #[test]
    fn revoking_active_key_is_refused() {
        let sb = sealer();
        let mut set = TenantKeySet::default();
        set.generate_initial(generate_signing_key(&sb, 0).expect("key")).expect("init");
        let kid = set.active().expect("active").kid.clone();
        let err = set.revoke(&kid, 1).expect_err("refused");
        assert!(matches!(err, AuthzError::ActiveKeyRevocation(_)));
        let err = set.revoke("missing", 1).expect_err("missing");
        assert!(matches!(err, AuthzError::KeyNotFound { .. }));
    }

    #[test]
    fn jwks_is_sorted_by_kid() {
        let sb = sealer();
        let mut set = TenantKeySet::default();
        set.generate_initial(generate_signing_key(&sb, 0).expect("key")).expect("init");
        for step in 1..4 {
            set.rotate(generate_signing_key(&sb, step).expect("key"), 1000, step)
                .expect("rotate");
        }
        let kids: Vec<_> = set.jwks(5).keys.into_iter().map(|key| key.kid).collect();
        let mut sorted = kids.clone();
        sorted.sort();
        assert_eq!(kids, sorted);
        assert_eq!(kids.len(), 4);
    }

    #[test]
    fn signing_material_requires_active_key_and_matching_master() {
        let sb = sealer();
        let record = generate_signing_key(&sb, 0).expect("key");
        assert!(signing_material(&record, &sb).is_ok());
        let other = SecretBox::new(MasterKey::from_bytes([1u8; 32]));
        assert!(matches!(
            signing_material(&record, &other),
            Err(AuthzError::Crypto(_))
        ));
        let retired = SigningKeyRecord {
            status: KeyStatus::Retiring,
            ..record.clone()
        };
        assert!(signing_material(&retired, &sb).is_err());
        assert!(verification_material(&record).is_ok());
    }

    #[test]
    fn validate_rejects_two_active_keys() {
        let sb = sealer();
        let set = TenantKeySet {
            keys: vec![
                generate_signing_key(&sb, 0).expect("key"),
                generate_signing_key(&sb, 0).expect("key"),
            ],
        };
        assert!(matches!(set.validate(), Err(AuthzError::InvalidKeySet(_))));
    }
}
