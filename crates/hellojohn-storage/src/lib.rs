//! Short-lived handle cache.
//!
//! Maps opaque handles (authorization codes, consent challenges, MFA tickets,
//! admin refresh handles) to serialized payloads with a mandatory TTL. Every
//! entry carries a tag, normally the owning tenant slug, so deleting a tenant
//! can purge its outstanding handles in one call.
//!
//! [`HandleCache::take`] is the one-shot primitive: it removes and returns the
//! entry under a single write lock, so concurrent consumers of the same handle
//! see exactly one success.
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    Serialization(String),
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Serialization(err) => write!(f, "serialization error: {err}"),
            StorageError::Unavailable(err) => write!(f, "cache unavailable: {err}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    tag: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait HandleCache: Send + Sync {
    async fn put(&self, key: &str, tag: &str, value: Bytes, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    /// Remove and return a live entry atomically.
    async fn take(&self, key: &str) -> Result<Option<Bytes>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Drop every entry carrying `tag`. Returns how many were removed.
    async fn purge_tag(&self, tag: &str) -> Result<usize>;
    async fn purge_expired(&self) -> Result<usize>;
}

/// In-process [`HandleCache`] with lazy expiry and an optional size cap.
///
/// ```
/// use bytes::Bytes;
/// use hellojohn_storage::{EphemeralCache, HandleCache};
/// use std::time::Duration;
///
/// let cache = EphemeralCache::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     cache
///         .put("code:abc", "acme", Bytes::from_static(b"v"), Duration::from_secs(60))
///         .await
///         .expect("put");
///     assert_eq!(cache.take("code:abc").await.expect("take"), Some(Bytes::from_static(b"v")));
///     assert_eq!(cache.take("code:abc").await.expect("take"), None);
/// });
/// ```
#[derive(Debug, Default)]
pub struct EphemeralCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
    max_entries: Option<usize>,
}

impl EphemeralCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_entries: Some(max_entries),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl HandleCache for EphemeralCache {
    async fn put(&self, key: &str, tag: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            tag: tag.to_string(),
            expires_at: now + ttl,
        };
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), entry);
        if let Some(max_entries) = self.max_entries
            && guard.len() > max_entries
        {
            guard.retain(|_, entry| !entry.is_expired(now));
            // Still over the cap: drop whatever expires soonest.
            while guard.len() > max_entries {
                let Some(victim) = guard
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                guard.remove(&victim);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        {
            let guard = self.inner.read().await;
            match guard.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        self.inner
            .write()
            .await
            .retain(|candidate, entry| candidate != key || !entry.is_expired(now));
        Ok(None)
    }

    async fn take(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        let removed = self.inner.write().await.remove(key);
        Ok(removed
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn purge_tag(&self, tag: &str) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.tag != tag);
        Ok(before - guard.len())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        Ok(before - guard.len())
    }
}

/// Serialize `value` as JSON and store it under `key`.
pub async fn put_json<T: Serialize + Sync>(
    cache: &dyn HandleCache,
    key: &str,
    tag: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|err| StorageError::Serialization(err.to_string()))?;
    cache.put(key, tag, Bytes::from(bytes), ttl).await
}

/// One-shot read of a JSON payload.
pub async fn take_json<T: DeserializeOwned>(cache: &dyn HandleCache, key: &str) -> Result<Option<T>> {
    match cache.take(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string())),
        None => Ok(None),
    }
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn HandleCache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string())),
        None => Ok(None),
    }
}

/// Periodically drop expired entries until the task is aborted.
pub fn spawn_sweeper(cache: Arc<dyn HandleCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "expired cache handles purged"),
                Err(err) => tracing::warn!(error = %err, "cache sweep failed"),
            }
        }
    })
}
