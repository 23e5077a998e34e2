//! EdDSA token codec.
//!
//! # Purpose
//! Signs and verifies compact JWS tokens for tenants. Key lookup and issuer
//! derivation are delegated to a [`TenantKeyStore`], so the codec itself holds
//! no state beyond the configured leeway.
//!
//! # Verification order
//! 1. Parse the header; reject any `alg` other than `EdDSA` and any token
//!    without `kid`.
//! 2. Read `tid` from the (still unverified) payload to pick the tenant.
//! 3. Resolve the verification key by `kid` and recompute the expected `iss`.
//! 4. Check the signature, `exp`/`nbf` with leeway, `iss`, then
//!    `iat <= now + leeway`.
use crate::claims::{TokenClaims, TokenUse, now_epoch_seconds};
use crate::{AuthzError, AuthzResult, TenantId};
use hellojohn_crypto::b64url_decode;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use std::sync::Arc;

pub struct TenantSigningKey {
    pub kid: String,
    pub encoding_key: EncodingKey,
}

pub struct TenantVerificationKey {
    pub kid: String,
    pub decoding_key: DecodingKey,
}

/// Source of key material and issuer values for the codec.
pub trait TenantKeyStore: Send + Sync {
    /// Current active key for signing.
    fn signing_key(&self, tenant: &TenantId) -> AuthzResult<TenantSigningKey>;
    /// Active or in-grace key with the given `kid`; `KeyNotFound` otherwise.
    fn verification_key(&self, tenant: &TenantId, kid: &str)
    -> AuthzResult<TenantVerificationKey>;
    /// Issuer derived from the tenant's settings.
    fn issuer(&self, tenant: &TenantId) -> AuthzResult<String>;
}

#[derive(Clone)]
pub struct TokenIssuer {
    key_store: Arc<dyn TenantKeyStore>,
}

impl TokenIssuer {
    pub fn new(key_store: Arc<dyn TenantKeyStore>) -> Self {
        Self { key_store }
    }

    /// Sign `claims` for `tenant`, stamping `iss` and `tid`.
    pub fn mint(
        &self,
        tenant: &TenantId,
        token_use: TokenUse,
        mut claims: TokenClaims,
    ) -> AuthzResult<String> {
        claims.iss = self.key_store.issuer(tenant)?;
        claims.tid = tenant.to_string();
        let signing_key = self.key_store.signing_key(tenant)?;
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(signing_key.kid);
        header.typ = Some(token_use.header_typ().to_string());
        Ok(jsonwebtoken::encode(&header, &claims, &signing_key.encoding_key)?)
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    key_store: Arc<dyn TenantKeyStore>,
    leeway: u64,
}

impl TokenVerifier {
    pub fn new(key_store: Arc<dyn TenantKeyStore>, leeway: u64) -> Self {
        Self { key_store, leeway }
    }

    pub fn leeway(&self) -> u64 {
        self.leeway
    }

    /// Verify a token of the given use for whatever tenant it names.
    pub fn verify(&self, token: &str, token_use: TokenUse) -> AuthzResult<TokenClaims> {
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != Algorithm::EdDSA {
            return Err(AuthzError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        let expected_typ = token_use.header_typ();
        let actual_typ = header.typ.as_deref().unwrap_or("JWT");
        if !actual_typ.eq_ignore_ascii_case(expected_typ) {
            return Err(AuthzError::WrongTokenUse {
                expected: expected_typ.to_string(),
                actual: actual_typ.to_string(),
            });
        }
        let kid = header.kid.ok_or(AuthzError::MissingKid)?;
        let tenant = peek_tenant(token)?;

        let key = self.key_store.verification_key(&tenant, &kid)?;
        let issuer = self.key_store.issuer(&tenant)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = self.leeway;
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        let data = jsonwebtoken::decode::<TokenClaims>(token, &key.decoding_key, &validation)?;

        let claims = data.claims;
        if claims.iat > now_epoch_seconds() + self.leeway as i64 {
            return Err(AuthzError::IssuedInFuture);
        }
        if claims.tid != tenant.as_str() {
            return Err(AuthzError::TenantMismatch {
                expected: tenant.to_string(),
                actual: claims.tid,
            });
        }
        Ok(claims)
    }

    /// Verify and additionally require the token to belong to `tenant`.
    pub fn verify_for_tenant(
        &self,
        token: &str,
        token_use: TokenUse,
        tenant: &TenantId,
    ) -> AuthzResult<TokenClaims> {
        let claims = self.verify(token, token_use)?;
        if claims.tid != tenant.as_str() {
            return Err(AuthzError::TenantMismatch {
                expected: tenant.to_string(),
                actual: claims.tid,
            });
        }
        Ok(claims)
    }
}

#[derive(Deserialize)]
struct TenantPeek {
    #[serde(default)]
    tid: String,
}

/// Read `tid` from an unverified compact JWS.
///
/// Only used to select key material; nothing read here is trusted until the
/// signature has been checked against that tenant's keys.
pub fn peek_tenant(token: &str) -> AuthzResult<TenantId> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthzError::Malformed("expected three segments".to_string()));
    };
    let bytes = b64url_decode(payload).map_err(|err| AuthzError::Malformed(err.to_string()))?;
    let peek: TenantPeek =
        serde_json::from_slice(&bytes).map_err(|err| AuthzError::Malformed(err.to_string()))?;
    if peek.tid.is_empty() {
        return Err(AuthzError::Malformed("missing tid".to_string()));
    }
    Ok(TenantId::new(peek.tid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{TenantKeySet, generate_signing_key, signing_material, verification_material};
    use hellojohn_crypto::{MasterKey, SecretBox};
    use parking_lot::RwLock;
    use std::collections::HashMap;

    struct MemoryKeys {
        sealer: SecretBox,
        sets: RwLock<HashMap<String, TenantKeySet>>,
        issuers: HashMap<String, String>,
    }

    impl MemoryKeys {
        fn new(tenants: &[&str]) -> Self {
            let sealer = SecretBox::new(MasterKey::from_bytes([3u8; 32]));
            let mut sets = HashMap::new();
            let mut issuers = HashMap::new();
            for tenant in tenants {
                let mut set = TenantKeySet::default();
                set.generate_initial(generate_signing_key(&sealer, now_epoch_seconds()).expect("key"))
                    .expect("init");
                sets.insert(tenant.to_string(), set);
                issuers.insert(
                    tenant.to_string(),
                    format!("https://id.example.com/t/{tenant}"),
                );
            }
            Self {
                sealer,
                sets: RwLock::new(sets),
                issuers,
            }
        }

        fn rotate(&self, tenant: &str, grace: i64, at: i64) -> String {
            let key = generate_signing_key(&self.sealer, at).expect("key");
            self.sets
                .write()
                .get_mut(tenant)
                .expect("tenant")
                .rotate(key, grace, at)
                .expect("rotate")
        }
    }

    impl TenantKeyStore for MemoryKeys {
        fn signing_key(&self, tenant: &TenantId) -> AuthzResult<TenantSigningKey> {
            let sets = self.sets.read();
            let active = sets
                .get(tenant.as_str())
                .and_then(TenantKeySet::active)
                .ok_or_else(|| AuthzError::MissingSigningKey(tenant.to_string()))?;
            Ok(TenantSigningKey {
                kid: active.kid.clone(),
                encoding_key: signing_material(active, &self.sealer)?,
            })
        }

        fn verification_key(
            &self,
            tenant: &TenantId,
            kid: &str,
        ) -> AuthzResult<TenantVerificationKey> {
            let sets = self.sets.read();
            let record = sets
                .get(tenant.as_str())
                .and_then(|set| set.resolve(kid, now_epoch_seconds()))
                .ok_or_else(|| AuthzError::KeyNotFound {
                    tenant: tenant.to_string(),
                    kid: kid.to_string(),
                })?;
            Ok(TenantVerificationKey {
                kid: record.kid.clone(),
                decoding_key: verification_material(record)?,
            })
        }

        fn issuer(&self, tenant: &TenantId) -> AuthzResult<String> {
            self.issuers
                .get(tenant.as_str())
                .cloned()
                .ok_or_else(|| AuthzError::UnknownTenant(tenant.to_string()))
        }
    }

    fn claims(ttl: i64) -> TokenClaims {
        let now = now_epoch_seconds();
        TokenClaims {
            sub: "user-1".to_string(),
            aud: "web".to_string(),
            exp: now + ttl,
            iat: now,
            jti: "jti-1".to_string(),
            amr: vec!["pwd".to_string()],
            acr: crate::ACR_LOA_1.to_string(),
            ..TokenClaims::default()
        }
        .with_scopes(["openid", "email"])
    }

    fn codec(store: Arc<MemoryKeys>) -> (TokenIssuer, TokenVerifier) {
        (
            TokenIssuer::new(store.clone()),
            TokenVerifier::new(store, 60),
        )
    }

    #[test]
    fn mint_and_verify_preserves_claims() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store);
        let tenant = TenantId::new("acme");
        let token = issuer
            .mint(&tenant, TokenUse::Access, claims(300))
            .expect("mint");

        let header = jsonwebtoken::decode_header(&token).expect("header");
        assert_eq!(header.alg, Algorithm::EdDSA);
        assert!(header.kid.is_some());

        let decoded = verifier.verify(&token, TokenUse::Access).expect("verify");
        let original = claims(300);
        assert_eq!(decoded.sub, original.sub);
        assert_eq!(decoded.tid, "acme");
        assert_eq!(decoded.aud, original.aud);
        assert_eq!(decoded.scope, original.scope);
        assert_eq!(decoded.scp, original.scp);
        assert_eq!(decoded.amr, original.amr);
        assert_eq!(decoded.acr, original.acr);
        assert_eq!(decoded.iss, "https://id.example.com/t/acme");
    }

    #[test]
    fn id_tokens_are_not_accepted_as_access_tokens() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store);
        let token = issuer
            .mint(&TenantId::new("acme"), TokenUse::Id, claims(300))
            .expect("mint");
        let err = verifier
            .verify(&token, TokenUse::Access)
            .expect_err("wrong use");
        assert!(matches!(err, AuthzError::WrongTokenUse { .. }));
        verifier.verify(&token, TokenUse::Id).expect("id verifies");
    }

    #[test]
    fn rotation_keeps_old_tokens_verifiable_during_grace() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store.clone());
        let tenant = TenantId::new("acme");
        let before = issuer
            .mint(&tenant, TokenUse::Access, claims(300))
            .expect("mint");
        let old_kid = jsonwebtoken::decode_header(&before).expect("h").kid;

        let new_kid = store.rotate("acme", 300, now_epoch_seconds());
        let after = issuer
            .mint(&tenant, TokenUse::Access, claims(300))
            .expect("mint");
        assert_eq!(
            jsonwebtoken::decode_header(&after).expect("h").kid,
            Some(new_kid)
        );
        assert_ne!(old_kid, jsonwebtoken::decode_header(&after).expect("h").kid);
        verifier.verify(&before, TokenUse::Access).expect("old verifies");
        verifier.verify(&after, TokenUse::Access).expect("new verifies");
    }

    #[test]
    fn rotation_without_grace_invalidates_old_tokens() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store.clone());
        let before = issuer
            .mint(&TenantId::new("acme"), TokenUse::Access, claims(300))
            .expect("mint");
        store.rotate("acme", 0, now_epoch_seconds() - 10);
        let err = verifier
            .verify(&before, TokenUse::Access)
            .expect_err("lapsed");
        assert!(matches!(err, AuthzError::KeyNotFound { .. }));
    }

    #[test]
    fn expired_tokens_fail_after_leeway() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store);
        let token = issuer
            .mint(&TenantId::new("acme"), TokenUse::Access, claims(-120))
            .expect("mint");
        let err = verifier.verify(&token, TokenUse::Access).expect_err("expired");
        assert!(matches!(err, AuthzError::Jwt(_)));
    }

    #[test]
    fn future_iat_is_rejected() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (issuer, verifier) = codec(store);
        let mut future = claims(3600);
        future.iat = now_epoch_seconds() + 600;
        let token = issuer
            .mint(&TenantId::new("acme"), TokenUse::Access, future)
            .expect("mint");
        let err = verifier.verify(&token, TokenUse::Access).expect_err("future");
        assert!(matches!(err, AuthzError::IssuedInFuture));
    }

    #[test]
    fn cross_tenant_key_does_not_verify() {
        let store = Arc::new(MemoryKeys::new(&["acme", "globex"]));
        let (issuer, verifier) = codec(store);
        let token = issuer
            .mint(&TenantId::new("acme"), TokenUse::Access, claims(300))
            .expect("mint");

        // Re-label the payload as globex while keeping acme's signature.
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let payload = b64url_decode(&parts[1]).expect("payload");
        let mut value: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        value["tid"] = serde_json::json!("globex");
        parts[1] = hellojohn_crypto::b64url_encode(&serde_json::to_vec(&value).expect("json"));
        let forged = parts.join(".");

        assert!(verifier.verify(&forged, TokenUse::Access).is_err());
        let err = verifier
            .verify_for_tenant(&token, TokenUse::Access, &TenantId::new("globex"))
            .expect_err("wrong tenant");
        assert!(matches!(err, AuthzError::TenantMismatch { .. }));
    }

    #[test]
    fn non_eddsa_tokens_are_rejected_before_key_lookup() {
        let store = Arc::new(MemoryKeys::new(&["acme"]));
        let (_, verifier) = codec(store);
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k".to_string());
        let mut hs_claims = claims(300);
        hs_claims.tid = "acme".to_string();
        let token = jsonwebtoken::encode(&header, &hs_claims, &EncodingKey::from_secret(b"s"))
            .expect("encode");
        let err = verifier.verify(&token, TokenUse::Access).expect_err("alg");
        assert!(matches!(err, AuthzError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn peek_tenant_rejects_garbage() {
        assert!(matches!(peek_tenant("garbage"), Err(AuthzError::Malformed(_))));
        assert!(matches!(peek_tenant("a.b.c"), Err(AuthzError::Malformed(_))));
    }
}
