//! Decoded key-material cache.
//!
//! Building an `EncodingKey` means unsealing the seed and re-encoding it as
//! PKCS#8 DER; building a `DecodingKey` means base64 decoding. Both are cached
//! per `tenant:kid`. Entries are dropped when the replicated log applies a key
//! change for the tenant, and independently expire after `ttl`.
use jsonwebtoken::{DecodingKey, EncodingKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Backstop expiry for decoded keys when an invalidation is missed.
pub const KEY_CACHE_TTL: Duration = Duration::from_secs(30);
/// Longest backstop accepted; a node cut off from apply events converges
/// within this bound.
pub const MAX_KEY_CACHE_TTL: Duration = Duration::from_secs(35);

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

pub struct KeyMaterialCache {
    ttl: Duration,
    encoding: RwLock<HashMap<String, Entry<(String, EncodingKey)>>>,
    decoding: RwLock<HashMap<String, Entry<DecodingKey>>>,
}

impl Default for KeyMaterialCache {
    fn default() -> Self {
        Self::new(KEY_CACHE_TTL)
    }
}

impl KeyMaterialCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_KEY_CACHE_TTL),
            encoding: RwLock::new(HashMap::new()),
            decoding: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached `(kid, key)` for the tenant's current signing key.
    pub fn encoding_key<E>(
        &self,
        tenant: &str,
        build: impl FnOnce() -> Result<(String, EncodingKey), E>,
    ) -> Result<(String, EncodingKey), E> {
        let cached = self
            .encoding
            .read()
            .get(tenant)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = build()?;
        self.encoding.write().insert(
            tenant.to_string(),
            Entry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(value)
    }

    pub fn decoding_key<E>(
        &self,
        tenant: &str,
        kid: &str,
        build: impl FnOnce() -> Result<DecodingKey, E>,
    ) -> Result<DecodingKey, E> {
        let key = cache_key(tenant, kid);
        let cached = self
            .decoding
            .read()
            .get(&key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = build()?;
        self.decoding.write().insert(
            key,
            Entry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(value)
    }

    pub fn invalidate_tenant(&self, tenant: &str) {
        let prefix = cache_key(tenant, "");
        self.encoding.write().remove(tenant);
        self.decoding
            .write()
            .retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.encoding.write().clear();
        self.decoding.write().clear();
    }
}

fn cache_key(tenant: &str, kid: &str) -> String {
    let mut key = String::with_capacity(tenant.len() + 1 + kid.len());
    key.push_str(tenant);
    key.push(':');
    key.push_str(kid);
    key
}
