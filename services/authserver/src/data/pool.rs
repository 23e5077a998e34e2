//! Per-tenant connection pool.
//!
//! One adapter connection per tenant, opened lazily. Concurrent first uses
//! of a tenant wait on the same slot lock so only one connect runs. A slot
//! remembers a fingerprint of the driver and DSN it was opened with; when
//! the tenant's store settings change the old connection is closed and a new
//! one is opened on next use.
use super::{AdapterDriver, DataError, DataResult, MemoryDriver, TenantDatabase};
use crate::store::FsStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hellojohn_crypto::{SecretBox, sha256_hex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Storage drivers known to this process. Filled once at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    drivers: HashMap<String, Arc<dyn AdapterDriver>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `memory` driver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MemoryDriver::new()));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn AdapterDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AdapterDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub idle_timeout: Duration,
    pub health_interval: Duration,
    /// Process-wide fallback used by tenants without their own store.
    pub global_driver: Option<String>,
    pub global_dsn: Option<String>,
    /// How long revoked refresh tokens are kept for reuse detection.
    pub revoked_retention: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            health_interval: Duration::from_secs(30),
            global_driver: None,
            global_dsn: None,
            revoked_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct PoolEntry {
    db: Arc<dyn TenantDatabase>,
    fingerprint: String,
    last_used: Instant,
}

type Slot = Arc<Mutex<Option<PoolEntry>>>;

pub struct TenantPool {
    store: FsStore,
    registry: Arc<AdapterRegistry>,
    sealer: SecretBox,
    settings: PoolSettings,
    slots: DashMap<String, Slot>,
    open: AtomicI64,
}

impl TenantPool {
    pub fn new(
        store: FsStore,
        registry: Arc<AdapterRegistry>,
        sealer: SecretBox,
        settings: PoolSettings,
    ) -> Self {
        Self {
            store,
            registry,
            sealer,
            settings,
            slots: DashMap::new(),
            open: AtomicI64::new(0),
        }
    }

    /// Whether `slug` resolves to some user store, without connecting.
    pub fn is_configured(&self, slug: &str) -> bool {
        matches!(self.resolve(slug), Ok(Some(_)))
    }

    pub async fn get(&self, slug: &str) -> DataResult<Arc<dyn TenantDatabase>> {
        let (driver_name, dsn) = self.resolve(slug)?.ok_or(DataError::NoDatabase)?;
        let fingerprint = sha256_hex(format!("{driver_name}\0{dsn}").as_bytes());
        let slot = self.slots.entry(slug.to_string()).or_default().clone();
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_mut()
            && entry.fingerprint == fingerprint
        {
            entry.last_used = Instant::now();
            return Ok(entry.db.clone());
        }
        if let Some(stale) = guard.take() {
            tracing::info!(tenant = slug, "tenant store settings changed; reconnecting");
            stale.db.close().await;
            self.adjust_open(-1);
        }

        let driver = self.registry.get(&driver_name).ok_or_else(|| {
            DataError::Unavailable(format!("unknown storage driver {driver_name}"))
        })?;
        let db = driver.connect(&dsn).await.map_err(|err| {
            tracing::warn!(tenant = slug, driver = %driver_name, error = %err, "tenant store connect failed");
            err
        })?;
        tracing::debug!(tenant = slug, driver = %driver_name, "tenant store connected");
        *guard = Some(PoolEntry {
            db: db.clone(),
            fingerprint,
            last_used: Instant::now(),
        });
        self.adjust_open(1);
        Ok(db)
    }

    /// A connection outside the pool, for work that must outlive eviction of
    /// the pooled one. The caller closes it.
    pub async fn open_detached(&self, slug: &str) -> DataResult<Arc<dyn TenantDatabase>> {
        let (driver_name, dsn) = self.resolve(slug)?.ok_or(DataError::NoDatabase)?;
        let driver = self.registry.get(&driver_name).ok_or_else(|| {
            DataError::Unavailable(format!("unknown storage driver {driver_name}"))
        })?;
        driver.connect(&dsn).await
    }

    /// Close and forget a tenant's connection.
    pub async fn evict(&self, slug: &str) {
        let Some((_, slot)) = self.slots.remove(slug) else {
            return;
        };
        if let Some(entry) = slot.lock().await.take() {
            entry.db.close().await;
            self.adjust_open(-1);
            tracing::debug!(tenant = slug, "tenant store evicted");
        }
    }

    pub async fn evict_all(&self) {
        let slugs: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        for slug in slugs {
            self.evict(&slug).await;
        }
    }

    pub fn open_connections(&self) -> i64 {
        self.open.load(Ordering::Acquire)
    }

    /// Purge stale rows from healthy connections, then close idle ones and
    /// drop ones that fail a ping.
    pub async fn maintain(&self) {
        let slots: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), slot.value().clone()))
            .collect();
        for (slug, slot) in slots {
            // A busy slot is in use, so it is neither idle nor worth pinging now.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let Some(entry) = guard.as_ref() else {
                continue;
            };
            let reason = if let Err(err) = entry.db.ping().await {
                tracing::warn!(tenant = %slug, error = %err, "tenant store health check failed");
                Some("unhealthy")
            } else {
                self.purge(&slug, entry.db.as_ref()).await;
                (entry.last_used.elapsed() >= self.settings.idle_timeout).then_some("idle")
            };
            if let Some(reason) = reason
                && let Some(entry) = guard.take()
            {
                entry.db.close().await;
                self.adjust_open(-1);
                tracing::info!(tenant = %slug, reason, "tenant store connection closed");
            }
        }
    }

    async fn purge(&self, slug: &str, db: &dyn TenantDatabase) {
        let now = Utc::now();
        let revoked_before = chrono::Duration::from_std(self.settings.revoked_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match db.purge_stale(now, revoked_before).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(tenant = slug, purged, "stale tenant rows purged"),
            Err(err) => tracing::warn!(tenant = slug, error = %err, "tenant purge failed"),
        }
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.settings.health_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.maintain().await;
            }
        })
    }

    fn resolve(&self, slug: &str) -> DataResult<Option<(String, String)>> {
        let tenant = self
            .store
            .tenant(slug)
            .map_err(|_| DataError::NotFound(format!("tenant {slug}")))?
            .value;
        if let Some(user_store) = tenant.settings.user_store {
            let dsn = self
                .sealer
                .open_str(&user_store.dsn_sealed)
                .map_err(|err| DataError::Unexpected(anyhow::anyhow!("unseal tenant dsn: {err}")))?;
            return Ok(Some((user_store.driver, dsn)));
        }
        match (&self.settings.global_driver, &self.settings.global_dsn) {
            (Some(driver), Some(dsn)) if !driver.is_empty() && !dsn.is_empty() => {
                Ok(Some((driver.clone(), namespaced_dsn(dsn, slug))))
            }
            _ => Ok(None),
        }
    }

    fn adjust_open(&self, delta: i64) {
        let open = self.open.fetch_add(delta, Ordering::AcqRel) + delta;
        metrics::gauge!("hellojohn_tenant_pool_connections").set(open as f64);
    }
}

/// Separate tenants that share the global store.
fn namespaced_dsn(dsn: &str, slug: &str) -> String {
    let separator = if dsn.contains('?') { '&' } else { '?' };
    format!("{dsn}{separator}tenant={slug}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ControlPlaneLog, LocalLog};
    use crate::control::ControlPlane;
    use crate::data::{SessionRecord, User};
    use crate::model::{Tenant, UserStoreSettings};
    use hellojohn_crypto::MasterKey;

    struct Fixture {
        _dir: tempfile::TempDir,
        control: ControlPlane,
        sealer: SecretBox,
        store: FsStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path()).expect("open");
        let log: Arc<dyn ControlPlaneLog> = Arc::new(LocalLog::new(1, store.clone()));
        let control = ControlPlane::new(store.clone(), log);
        for slug in ["acme", "beta"] {
            control
                .upsert_tenant(&Tenant::new(slug, slug, 0), None)
                .await
                .expect("tenant");
        }
        Fixture {
            _dir: dir,
            control,
            sealer: SecretBox::new(MasterKey::generate()),
            store,
        }
    }

    fn pool(fixture: &Fixture, settings: PoolSettings) -> TenantPool {
        TenantPool::new(
            fixture.store.clone(),
            Arc::new(AdapterRegistry::with_defaults()),
            fixture.sealer.clone(),
            settings,
        )
    }

    fn global() -> PoolSettings {
        PoolSettings {
            global_driver: Some("memory".to_string()),
            global_dsn: Some("memory://shared".to_string()),
            ..PoolSettings::default()
        }
    }

    #[tokio::test]
    async fn tenants_without_a_store_report_no_database() {
        let fixture = fixture().await;
        let pool = pool(&fixture, PoolSettings::default());
        assert!(matches!(pool.get("acme").await, Err(DataError::NoDatabase)));
        assert!(matches!(pool.get("ghost").await, Err(DataError::NotFound(_))));
        assert!(!pool.is_configured("acme"));
    }

    #[tokio::test]
    async fn global_store_is_namespaced_per_tenant() {
        let fixture = fixture().await;
        let pool = pool(&fixture, global());
        let acme = pool.get("acme").await.expect("acme");
        acme.users()
            .create(User::new("a@example.com", None, Utc::now()))
            .await
            .expect("create");
        let beta = pool.get("beta").await.expect("beta");
        assert!(beta.users().list().await.expect("list").is_empty());
        assert_eq!(pool.open_connections(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_use_connects_once() {
        let fixture = fixture().await;
        let pool = Arc::new(pool(&fixture, global()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.get("acme").await.map(|_| ()) }));
        }
        for handle in handles {
            handle.await.expect("join").expect("get");
        }
        assert_eq!(pool.open_connections(), 1);
    }

    #[tokio::test]
    async fn settings_change_reconnects() {
        let fixture = fixture().await;
        let pool = pool(&fixture, global());
        let first = pool.get("acme").await.expect("first");

        let mut tenant = fixture.store.tenant("acme").expect("tenant").value;
        tenant.settings.user_store = Some(UserStoreSettings {
            driver: "memory".to_string(),
            dsn_sealed: fixture.sealer.seal_str("memory://acme-own").expect("seal"),
        });
        fixture.control.upsert_tenant(&tenant, None).await.expect("update");

        let second = pool.get("acme").await.expect("second");
        assert!(first.ping().await.is_err());
        assert!(second.ping().await.is_ok());
        assert_eq!(pool.open_connections(), 1);
    }

    #[tokio::test]
    async fn idle_connections_are_closed() {
        let fixture = fixture().await;
        let pool = pool(
            &fixture,
            PoolSettings {
                idle_timeout: Duration::ZERO,
                ..global()
            },
        );
        let db = pool.get("acme").await.expect("get");
        pool.maintain().await;
        assert!(db.ping().await.is_err());
        assert_eq!(pool.open_connections(), 0);
        assert!(pool.get("acme").await.expect("reconnect").ping().await.is_ok());
    }

    #[tokio::test]
    async fn detached_connections_survive_eviction() {
        let fixture = fixture().await;
        let pool = pool(&fixture, global());
        let pooled = pool.get("acme").await.expect("pooled");
        pooled
            .users()
            .create(User::new("a@example.com", None, Utc::now()))
            .await
            .expect("create");
        let detached = pool.open_detached("acme").await.expect("detached");
        assert_eq!(pool.open_connections(), 1);

        pool.evict("acme").await;
        assert!(pooled.ping().await.is_err());
        assert_eq!(detached.users().list().await.expect("list").len(), 1);
        detached.close().await;
    }

    #[tokio::test]
    async fn maintenance_purges_expired_sessions() {
        let fixture = fixture().await;
        let pool = pool(&fixture, global());
        let db = pool.get("acme").await.expect("get");
        let now = Utc::now();
        db.sessions()
            .create(SessionRecord {
                id_hash: "gone".to_string(),
                user_id: uuid::Uuid::new_v4(),
                created_at: now - chrono::Duration::hours(2),
                last_activity_at: now - chrono::Duration::hours(2),
                expires_at: now - chrono::Duration::hours(1),
                revoked_at: None,
                revoked_by: None,
                reason: None,
            })
            .await
            .expect("session");

        pool.maintain().await;
        assert!(db.ping().await.is_ok());
        assert!(db.sessions().get("gone").await.expect("get").is_none());
    }
}
