//! Token key resolution over the control-plane store.
use crate::store::FsStore;
use hellojohn_authz::{
    AuthzError, AuthzResult, Jwks, KeyMaterialCache, TenantId, TenantKeyStore, TenantSigningKey,
    TenantVerificationKey, now_epoch_seconds, resolve_issuer, signing_material,
    verification_material,
};
use hellojohn_crypto::SecretBox;
use std::sync::Arc;
use std::time::Duration;

/// Reads signing keys and issuer settings from the local store copy.
///
/// Decoded material is cached per tenant. Status checks always run against
/// the store so a revoked or lapsed key stops verifying on the apply that
/// changed it, not when the cache entry expires.
#[derive(Clone)]
pub struct KeyService {
    store: FsStore,
    sealer: SecretBox,
    cache: Arc<KeyMaterialCache>,
    issuer_base: String,
}

impl KeyService {
    pub fn new(store: FsStore, sealer: SecretBox, issuer_base: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            sealer,
            cache: Arc::new(KeyMaterialCache::new(ttl)),
            issuer_base: issuer_base.into(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn issuer_base(&self) -> &str {
        self.issuer_base.trim_end_matches('/')
    }

    pub fn invalidate(&self, tenant: &str) {
        self.cache.invalidate_tenant(tenant);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// JWKS for one tenant, `None` if the tenant does not exist.
    pub fn jwks(&self, slug: &str) -> Option<Jwks> {
        let keys = self.store.keys(slug).ok()?;
        Some(keys.value.jwks(now_epoch_seconds()).normalized())
    }

    /// Union of every tenant's published keys.
    pub fn all_jwks(&self) -> Jwks {
        let now = now_epoch_seconds();
        Jwks::merge(
            self.store
                .tenants()
                .iter()
                .filter_map(|tenant| self.store.keys(&tenant.slug).ok())
                .map(|keys| keys.value.jwks(now)),
        )
    }
}

impl TenantKeyStore for KeyService {
    fn signing_key(&self, tenant: &TenantId) -> AuthzResult<TenantSigningKey> {
        let keys = self
            .store
            .keys(tenant.as_str())
            .map_err(|_| AuthzError::UnknownTenant(tenant.to_string()))?;
        let active = keys
            .value
            .active()
            .ok_or_else(|| AuthzError::MissingSigningKey(tenant.to_string()))?
            .clone();
        let cached = self
            .cache
            .encoding_key(tenant.as_str(), || -> AuthzResult<_> {
                Ok((active.kid.clone(), signing_material(&active, &self.sealer)?))
            })?;
        if cached.0 == active.kid {
            return Ok(TenantSigningKey {
                kid: cached.0,
                encoding_key: cached.1,
            });
        }
        // A rotation landed after the entry was cached.
        self.cache.invalidate_tenant(tenant.as_str());
        let (kid, encoding_key) = self.cache.encoding_key(tenant.as_str(), || -> AuthzResult<_> {
            Ok((active.kid.clone(), signing_material(&active, &self.sealer)?))
        })?;
        Ok(TenantSigningKey { kid, encoding_key })
    }

    fn verification_key(
        &self,
        tenant: &TenantId,
        kid: &str,
    ) -> AuthzResult<TenantVerificationKey> {
        let keys = self
            .store
            .keys(tenant.as_str())
            .map_err(|_| AuthzError::UnknownTenant(tenant.to_string()))?;
        let record = keys
            .value
            .resolve(kid, now_epoch_seconds())
            .ok_or_else(|| AuthzError::KeyNotFound {
                tenant: tenant.to_string(),
                kid: kid.to_string(),
            })?
            .clone();
        let decoding_key = self
            .cache
            .decoding_key(tenant.as_str(), kid, || verification_material(&record))?;
        Ok(TenantVerificationKey {
            kid: kid.to_string(),
            decoding_key,
        })
    }

    fn issuer(&self, tenant: &TenantId) -> AuthzResult<String> {
        let record = self
            .store
            .tenant(tenant.as_str())
            .map_err(|_| AuthzError::UnknownTenant(tenant.to_string()))?;
        Ok(resolve_issuer(
            &self.issuer_base,
            &record.value.settings.issuer,
            &record.value.slug,
        ))
    }
}
