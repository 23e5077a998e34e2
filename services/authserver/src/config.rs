use anyhow::{Context, Result, bail};
use hellojohn_crypto::MasterKey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

// Authorization server configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    pub bind_addr: SocketAddr,
    /// Global issuer base (`JWT_ISSUER`).
    pub issuer: String,
    pub default_tenant: String,
    pub fs_root: PathBuf,
    /// Seals private signing keys.
    pub signing_master_key: MasterKey,
    /// Seals client secrets and tenant DSNs.
    pub secretbox_master_key: MasterKey,
    pub storage_driver: Option<String>,
    pub storage_dsn: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub token_leeway_seconds: u64,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub id_ttl_seconds: i64,
    pub csrf_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    /// Peers whose `X-Forwarded-For` is believed when keying rate limits.
    pub trusted_proxies: Vec<IpAddr>,
    pub pool_idle_seconds: u64,
    pub pool_health_seconds: u64,
    pub metrics_enabled: bool,
    pub otlp_enabled: bool,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    Single,
    Embedded,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub mode: ClusterMode,
    pub node_id: u64,
    /// Peer listen and advertise address (`RAFT_ADDR`).
    pub raft_addr: Option<String>,
    pub nodes: BTreeMap<u64, String>,
    pub bootstrap: bool,
    pub snapshot_every: u64,
    pub heartbeat_ms: u64,
    pub election_min_ms: u64,
    pub election_max_ms: u64,
    pub tls: Option<RaftTlsPaths>,
    /// Public base URL of each node, for follower redirects.
    pub leader_redirects: BTreeMap<u64, String>,
    pub redirect_allowed_hosts: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Single,
            node_id: 1,
            raft_addr: None,
            nodes: BTreeMap::new(),
            bootstrap: false,
            snapshot_every: 1000,
            heartbeat_ms: 250,
            election_min_ms: 800,
            election_max_ms: 1600,
            tls: None,
            leader_redirects: BTreeMap::new(),
            redirect_allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaftTlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    pub server_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthServerConfigOverride {
    bind_addr: Option<String>,
    issuer: Option<String>,
    default_tenant: Option<String>,
    fs_root: Option<PathBuf>,
    storage_driver: Option<String>,
    storage_dsn: Option<String>,
    token_leeway_seconds: Option<u64>,
    access_ttl_seconds: Option<i64>,
    refresh_ttl_seconds: Option<i64>,
    id_ttl_seconds: Option<i64>,
    rate_limit_per_minute: Option<u32>,
    rate_limit_burst: Option<u32>,
    trusted_proxies: Option<Vec<String>>,
    metrics_enabled: Option<bool>,
    cluster: Option<ClusterOverride>,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterOverride {
    mode: Option<String>,
    node_id: Option<u64>,
    raft_addr: Option<String>,
    nodes: Option<String>,
    bootstrap: Option<bool>,
    snapshot_every: Option<u64>,
    leader_redirects: Option<String>,
    redirect_allowed_hosts: Option<Vec<String>>,
}

impl AuthServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HELLOJOHN_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read HELLOJOHN_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Single-node settings rooted at `fs_root` with fresh master keys.
    pub fn local(fs_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            issuer: "http://localhost:8080".to_string(),
            default_tenant: "local".to_string(),
            fs_root: fs_root.into(),
            signing_master_key: MasterKey::generate(),
            secretbox_master_key: MasterKey::generate(),
            storage_driver: None,
            storage_dsn: None,
            admin_email: None,
            admin_password: None,
            token_leeway_seconds: 60,
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 2_592_000,
            id_ttl_seconds: 3600,
            csrf_ttl_seconds: 1800,
            session_ttl_seconds: 86_400,
            rate_limit_per_minute: 120,
            rate_limit_burst: 30,
            trusted_proxies: Vec::new(),
            pool_idle_seconds: 600,
            pool_health_seconds: 30,
            metrics_enabled: true,
            otlp_enabled: false,
            cluster: ClusterConfig::default(),
        }
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let signing_master_key = get("SIGNING_MASTER_KEY")
            .context("SIGNING_MASTER_KEY is required")
            .and_then(|value| {
                MasterKey::from_hex(&value).with_context(|| "parse SIGNING_MASTER_KEY")
            })?;
        let secretbox_master_key = get("SECRETBOX_MASTER_KEY")
            .context("SECRETBOX_MASTER_KEY is required")
            .and_then(|value| {
                MasterKey::from_base64(&value).with_context(|| "parse SECRETBOX_MASTER_KEY")
            })?;

        let mut config = Self::local(
            get("CONTROL_PLANE_FS_ROOT").unwrap_or_else(|| "./data/hellojohn".to_string()),
        );
        config.signing_master_key = signing_master_key;
        config.secretbox_master_key = secretbox_master_key;
        config.bind_addr = parse_or(&get, "HELLOJOHN_BIND", "0.0.0.0:8080".parse()?)?;
        if let Some(issuer) = get("JWT_ISSUER") {
            config.issuer = issuer.trim_end_matches('/').to_string();
        }
        if let Some(tenant) = get("HELLOJOHN_DEFAULT_TENANT") {
            config.default_tenant = tenant;
        }
        config.storage_driver = get("STORAGE_DRIVER");
        config.storage_dsn = get("STORAGE_DSN");
        config.admin_email = get("HELLOJOHN_ADMIN_EMAIL");
        config.admin_password = get("HELLOJOHN_ADMIN_PASSWORD");
        config.token_leeway_seconds = parse_or(&get, "HELLOJOHN_TOKEN_LEEWAY_SECONDS", 60)?;
        config.access_ttl_seconds = parse_or(&get, "HELLOJOHN_ACCESS_TTL_SECONDS", 900)?;
        config.refresh_ttl_seconds = parse_or(&get, "HELLOJOHN_REFRESH_TTL_SECONDS", 2_592_000)?;
        config.id_ttl_seconds = parse_or(&get, "HELLOJOHN_ID_TTL_SECONDS", 3600)?;
        config.csrf_ttl_seconds = parse_or(&get, "HELLOJOHN_CSRF_TTL_SECONDS", 1800)?;
        config.session_ttl_seconds = parse_or(&get, "HELLOJOHN_SESSION_TTL_SECONDS", 86_400)?;
        config.rate_limit_per_minute = parse_or(&get, "HELLOJOHN_RATE_LIMIT_PER_MINUTE", 120)?;
        config.rate_limit_burst = parse_or(&get, "HELLOJOHN_RATE_LIMIT_BURST", 30)?;
        if let Some(proxies) = get("HELLOJOHN_TRUSTED_PROXIES") {
            config.trusted_proxies =
                parse_ips(&split_list(&proxies)).with_context(|| "parse HELLOJOHN_TRUSTED_PROXIES")?;
        }
        config.pool_idle_seconds = parse_or(&get, "HELLOJOHN_TENANT_POOL_IDLE_SECONDS", 600)?;
        config.pool_health_seconds = parse_or(&get, "HELLOJOHN_TENANT_POOL_HEALTH_SECONDS", 30)?;
        config.metrics_enabled = parse_or(&get, "HELLOJOHN_METRICS_ENABLED", true)?;
        config.otlp_enabled = parse_or(&get, "HELLOJOHN_TRACING_OTLP_ENABLED", false)?;

        let cluster = &mut config.cluster;
        cluster.mode = match get("CLUSTER_MODE").as_deref() {
            Some("embedded") => ClusterMode::Embedded,
            _ => ClusterMode::Single,
        };
        cluster.node_id = parse_or(&get, "NODE_ID", 1)?;
        cluster.raft_addr = get("RAFT_ADDR");
        if let Some(nodes) = get("CLUSTER_NODES") {
            cluster.nodes = parse_id_map(&nodes).with_context(|| "parse CLUSTER_NODES")?;
        }
        cluster.bootstrap = parse_or(&get, "CLUSTER_BOOTSTRAP", false)?;
        cluster.snapshot_every = parse_or(&get, "RAFT_SNAPSHOT_EVERY", 1000)?;
        cluster.heartbeat_ms = parse_or(&get, "RAFT_HEARTBEAT_MS", 250)?;
        cluster.election_min_ms = parse_or(&get, "RAFT_ELECTION_MIN_MS", 800)?;
        cluster.election_max_ms = parse_or(&get, "RAFT_ELECTION_MAX_MS", 1600)?;
        cluster.tls = match (get("RAFT_TLS_CERT"), get("RAFT_TLS_KEY"), get("RAFT_TLS_CA")) {
            (Some(cert), Some(key), Some(ca)) => Some(RaftTlsPaths {
                cert: cert.into(),
                key: key.into(),
                ca: ca.into(),
                server_name: get("RAFT_TLS_SERVER_NAME"),
            }),
            (None, None, None) => None,
            _ => bail!("RAFT_TLS_CERT, RAFT_TLS_KEY and RAFT_TLS_CA must be set together"),
        };
        if let Some(redirects) = get("LEADER_REDIRECTS") {
            cluster.leader_redirects =
                parse_id_map(&redirects).with_context(|| "parse LEADER_REDIRECTS")?;
        }
        if let Some(hosts) = get("LEADER_REDIRECT_ALLOWED_HOSTS") {
            cluster.redirect_allowed_hosts = split_list(&hosts);
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: AuthServerConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse authserver config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.issuer {
            self.issuer = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = override_cfg.default_tenant {
            self.default_tenant = value;
        }
        if let Some(value) = override_cfg.fs_root {
            self.fs_root = value;
        }
        if override_cfg.storage_driver.is_some() {
            self.storage_driver = override_cfg.storage_driver;
        }
        if override_cfg.storage_dsn.is_some() {
            self.storage_dsn = override_cfg.storage_dsn;
        }
        if let Some(value) = override_cfg.token_leeway_seconds {
            self.token_leeway_seconds = value;
        }
        if let Some(value) = override_cfg.access_ttl_seconds {
            self.access_ttl_seconds = value;
        }
        if let Some(value) = override_cfg.refresh_ttl_seconds {
            self.refresh_ttl_seconds = value;
        }
        if let Some(value) = override_cfg.id_ttl_seconds {
            self.id_ttl_seconds = value;
        }
        if let Some(value) = override_cfg.rate_limit_per_minute {
            self.rate_limit_per_minute = value;
        }
        if let Some(value) = override_cfg.rate_limit_burst {
            self.rate_limit_burst = value;
        }
        if let Some(value) = override_cfg.trusted_proxies {
            self.trusted_proxies = parse_ips(&value).with_context(|| "parse trusted_proxies")?;
        }
        if let Some(value) = override_cfg.metrics_enabled {
            self.metrics_enabled = value;
        }
        if let Some(cluster) = override_cfg.cluster {
            if let Some(mode) = cluster.mode {
                self.cluster.mode = match mode.as_str() {
                    "embedded" => ClusterMode::Embedded,
                    "single" => ClusterMode::Single,
                    other => bail!("unknown cluster mode {other}"),
                };
            }
            if let Some(value) = cluster.node_id {
                self.cluster.node_id = value;
            }
            if cluster.raft_addr.is_some() {
                self.cluster.raft_addr = cluster.raft_addr;
            }
            if let Some(value) = cluster.nodes {
                self.cluster.nodes = parse_id_map(&value).with_context(|| "parse cluster.nodes")?;
            }
            if let Some(value) = cluster.bootstrap {
                self.cluster.bootstrap = value;
            }
            if let Some(value) = cluster.snapshot_every {
                self.cluster.snapshot_every = value;
            }
            if let Some(value) = cluster.leader_redirects {
                self.cluster.leader_redirects =
                    parse_id_map(&value).with_context(|| "parse cluster.leader_redirects")?;
            }
            if let Some(value) = cluster.redirect_allowed_hosts {
                self.cluster.redirect_allowed_hosts = value;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.issuer.starts_with("http://") || self.issuer.starts_with("https://")) {
            bail!("JWT_ISSUER must be an absolute http(s) URL");
        }
        if self.default_tenant.trim().is_empty() {
            bail!("HELLOJOHN_DEFAULT_TENANT must not be empty");
        }
        for (name, ttl) in [
            ("access", self.access_ttl_seconds),
            ("refresh", self.refresh_ttl_seconds),
            ("id", self.id_ttl_seconds),
            ("csrf", self.csrf_ttl_seconds),
            ("session", self.session_ttl_seconds),
        ] {
            if ttl <= 0 {
                bail!("{name} ttl must be positive");
            }
        }
        if self.rate_limit_per_minute == 0 || self.rate_limit_burst == 0 {
            bail!("rate limits must be positive");
        }
        if self.storage_driver.is_some() != self.storage_dsn.is_some() {
            bail!("STORAGE_DRIVER and STORAGE_DSN must be set together");
        }
        if self.cluster.mode == ClusterMode::Embedded {
            let Some(raft_addr) = &self.cluster.raft_addr else {
                bail!("RAFT_ADDR is required when CLUSTER_MODE=embedded");
            };
            if !self.cluster.nodes.is_empty() {
                match self.cluster.nodes.get(&self.cluster.node_id) {
                    Some(addr) if addr == raft_addr => {}
                    Some(addr) => bail!(
                        "CLUSTER_NODES lists node {} at {addr}, but RAFT_ADDR is {raft_addr}",
                        self.cluster.node_id
                    ),
                    None => bail!("CLUSTER_NODES does not include NODE_ID {}", self.cluster.node_id),
                }
            }
            if self.cluster.election_min_ms <= self.cluster.heartbeat_ms
                || self.cluster.election_max_ms <= self.cluster.election_min_ms
            {
                bail!("raft timings must satisfy heartbeat < election_min < election_max");
            }
        }
        Ok(())
    }

    /// Members including this node, for cluster initialization.
    pub fn members(&self) -> BTreeMap<u64, String> {
        let mut members = self.cluster.nodes.clone();
        if let Some(addr) = &self.cluster.raft_addr {
            members.entry(self.cluster.node_id).or_insert_with(|| addr.clone());
        }
        members
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("parse {key}")),
        None => Ok(default),
    }
}

/// Parse `1=host:port,2=host:port`.
fn parse_id_map(value: &str) -> Result<BTreeMap<u64, String>> {
    let mut map = BTreeMap::new();
    for entry in split_list(value) {
        let (id, target) = entry
            .split_once('=')
            .with_context(|| format!("expected id=value, got {entry}"))?;
        let id: u64 = id.trim().parse().with_context(|| format!("node id {id}"))?;
        map.insert(id, target.trim().trim_end_matches('/').to_string());
    }
    Ok(map)
}

fn parse_ips(values: &[String]) -> Result<Vec<IpAddr>> {
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("ip address {value}"))
        })
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const B64_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn keys() -> Vec<(&'static str, &'static str)> {
        vec![("SIGNING_MASTER_KEY", HEX_KEY), ("SECRETBOX_MASTER_KEY", B64_KEY)]
    }

    #[test]
    fn master_keys_are_required() {
        let err = AuthServerConfig::from_lookup(lookup(&[])).expect_err("missing keys");
        assert!(err.to_string().contains("SIGNING_MASTER_KEY"));

        let err = AuthServerConfig::from_lookup(lookup(&[
            ("SIGNING_MASTER_KEY", "abcd"),
            ("SECRETBOX_MASTER_KEY", B64_KEY),
        ]))
        .expect_err("short key");
        assert!(format!("{err:#}").contains("32 bytes"));
    }

    #[test]
    fn defaults_apply() {
        let config = AuthServerConfig::from_lookup(lookup(&keys())).expect("config");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.default_tenant, "local");
        assert_eq!(config.refresh_ttl_seconds, 2_592_000);
        assert_eq!(config.cluster.mode, ClusterMode::Single);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cluster_settings_parse() {
        let mut pairs = keys();
        pairs.extend([
            ("CLUSTER_MODE", "embedded"),
            ("NODE_ID", "2"),
            ("RAFT_ADDR", "10.0.0.2:7000"),
            ("CLUSTER_NODES", "1=10.0.0.1:7000, 2=10.0.0.2:7000,3=10.0.0.3:7000"),
            ("LEADER_REDIRECTS", "1=https://a.example.com/,2=https://b.example.com"),
            ("LEADER_REDIRECT_ALLOWED_HOSTS", "a.example.com, b.example.com"),
            ("JWT_ISSUER", "https://auth.example.com/"),
        ]);
        let config = AuthServerConfig::from_lookup(lookup(&pairs)).expect("config");
        config.validate().expect("valid");
        assert_eq!(config.cluster.nodes.len(), 3);
        assert_eq!(
            config.cluster.leader_redirects.get(&1).map(String::as_str),
            Some("https://a.example.com")
        );
        assert_eq!(config.cluster.redirect_allowed_hosts, vec!["a.example.com", "b.example.com"]);
        assert_eq!(config.issuer, "https://auth.example.com");
    }

    #[test]
    fn trusted_proxies_parse() {
        let mut pairs = keys();
        pairs.push(("HELLOJOHN_TRUSTED_PROXIES", "10.0.0.1, ::1"));
        let config = AuthServerConfig::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(
            config.trusted_proxies,
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse::<IpAddr>().unwrap()]
        );

        let mut pairs = keys();
        pairs.push(("HELLOJOHN_TRUSTED_PROXIES", "gateway.internal"));
        assert!(AuthServerConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn partial_tls_settings_are_rejected() {
        let mut pairs = keys();
        pairs.push(("RAFT_TLS_CERT", "/tmp/cert.pem"));
        assert!(AuthServerConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn embedded_mode_needs_a_consistent_address() {
        let mut pairs = keys();
        pairs.extend([
            ("CLUSTER_MODE", "embedded"),
            ("NODE_ID", "4"),
            ("RAFT_ADDR", "10.0.0.4:7000"),
            ("CLUSTER_NODES", "1=10.0.0.1:7000"),
        ]);
        let config = AuthServerConfig::from_lookup(lookup(&pairs)).expect("config");
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hellojohn.yaml");
        std::fs::write(
            &path,
            "default_tenant: acme\nissuer: https://id.example.com\ncluster:\n  node_id: 7\n",
        )
        .expect("write yaml");
        unsafe {
            std::env::set_var("SIGNING_MASTER_KEY", HEX_KEY);
            std::env::set_var("SECRETBOX_MASTER_KEY", B64_KEY);
            std::env::set_var("HELLOJOHN_CONFIG", &path);
        }
        let config = AuthServerConfig::from_env_or_yaml();
        unsafe {
            std::env::remove_var("SIGNING_MASTER_KEY");
            std::env::remove_var("SECRETBOX_MASTER_KEY");
            std::env::remove_var("HELLOJOHN_CONFIG");
        }
        let config = config.expect("config");
        assert_eq!(config.default_tenant, "acme");
        assert_eq!(config.issuer, "https://id.example.com");
        assert_eq!(config.cluster.node_id, 7);
    }
}
