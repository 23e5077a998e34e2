//! hellojohn authorization server library crate.
//!
//! # Purpose
//! Exposes the OAuth/OIDC surface, admin API, control-plane store, tenant
//! data layer and cluster wiring for use by the binary and tests.
//!
//! # Notes
//! [`run_with_shutdown`] owns process startup: observability, the store,
//! the cluster log (single node or embedded raft), background tasks,
//! bootstrap and the HTTP listener.
pub mod api;
pub mod app;
pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod control;
pub mod data;
pub mod keys;
pub mod middleware;
pub mod model;
pub mod oauth;
pub mod observability;
pub mod store;

use crate::app::{AppState, build_router, build_state, spawn_apply_listener};
use crate::cluster::{LocalLog, RaftLog, SharedLog};
use crate::config::{AuthServerConfig, ClusterMode};
use crate::store::FsStore;
use anyhow::Context;
use hellojohn_consensus::{ClusterNode, NodeSettings, PeerTls, RaftConfig};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const LEADER_WAIT: Duration = Duration::from_secs(30);

struct Cluster {
    log: SharedLog,
    node: Option<ClusterNode>,
    tasks: Vec<JoinHandle<()>>,
}

async fn start_cluster(
    config: &AuthServerConfig,
    store: &FsStore,
    stop: watch::Receiver<bool>,
) -> anyhow::Result<Cluster> {
    if config.cluster.mode == ClusterMode::Single {
        tracing::info!(node_id = config.cluster.node_id, "single-node control plane");
        return Ok(Cluster {
            log: Arc::new(LocalLog::new(config.cluster.node_id, store.clone())),
            node: None,
            tasks: Vec::new(),
        });
    }

    let raft_addr = config
        .cluster
        .raft_addr
        .clone()
        .context("RAFT_ADDR is required in embedded mode")?;
    let tls = match &config.cluster.tls {
        Some(paths) => Some(
            PeerTls::from_paths(&paths.cert, &paths.key, &paths.ca, paths.server_name.clone())
                .context("load raft tls material")?,
        ),
        None => None,
    };
    let settings = NodeSettings {
        config: RaftConfig {
            cluster_name: "hellojohn".to_string(),
            node_id: config.cluster.node_id,
            heartbeat_interval_ms: config.cluster.heartbeat_ms,
            election_timeout_min_ms: config.cluster.election_min_ms,
            election_timeout_max_ms: config.cluster.election_max_ms,
            snapshot_every: config.cluster.snapshot_every,
        },
        data_dir: config.fs_root.join("raft"),
        advertise_addr: raft_addr.clone(),
        members: config.members(),
        bootstrap: config.cluster.bootstrap,
        tls: tls.clone(),
    };
    let node = ClusterNode::start(settings, Arc::new(store.clone()))
        .await
        .context("start raft node")?;

    let server_tls = match &tls {
        Some(tls) => Some(tls.server_config().context("raft tls server config")?),
        None => None,
    };
    let listener = tokio::net::TcpListener::bind(&raft_addr)
        .await
        .with_context(|| format!("bind raft listener {raft_addr}"))?;
    tracing::info!(addr = %raft_addr, mtls = server_tls.is_some(), "raft peer listener ready");
    let router = node.router();
    let mut stop = stop;
    let peer_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop.changed().await;
        };
        if let Err(err) = hellojohn_consensus::server::serve(listener, router, server_tls, shutdown).await {
            tracing::error!(error = %err, "raft peer listener failed");
        }
    });

    let raft_log = RaftLog::new(node.clone());
    let health_task = raft_log.watch_store_health(store);
    Ok(Cluster {
        log: Arc::new(raft_log),
        node: Some(node),
        tasks: vec![peer_task, health_task],
    })
}

fn spawn_background(state: &AppState) -> Vec<JoinHandle<()>> {
    let limiter = state.rate_limiter.clone();
    let limiter_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            limiter.prune(Instant::now());
        }
    });
    vec![
        spawn_apply_listener(state.clone()),
        state.pool.spawn_maintenance(),
        hellojohn_storage::spawn_sweeper(state.cache.clone(), SWEEP_INTERVAL),
        limiter_task,
    ]
}

/// Provision once a leader is known. Followers return immediately.
fn spawn_bootstrap(state: AppState, node: Option<ClusterNode>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(node) = node
            && let Err(err) = node.wait_for_leader(LEADER_WAIT).await
        {
            tracing::warn!(error = %err, "no leader yet; bootstrap skipped");
            return;
        }
        if let Err(err) = bootstrap::provision(&state).await {
            tracing::error!(error = %err, "bootstrap failed");
        }
    })
}

pub async fn run_with_shutdown<F>(config: AuthServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability(
        "hellojohn",
        config.cluster.node_id,
        config.otlp_enabled,
    );
    config.validate()?;
    let store = FsStore::open(&config.fs_root).context("open control-plane store")?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let cluster = start_cluster(&config, &store, stop_rx).await?;

    let addr = config.bind_addr;
    let state = build_state(config, store, cluster.log.clone(), Some(metrics_handle));
    let mut tasks = spawn_background(&state);
    tasks.extend(cluster.tasks);
    let bootstrap_task = spawn_bootstrap(state.clone(), cluster.node.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "authorization server listening");
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    let _ = stop_tx.send(true);
    bootstrap_task.abort();
    let _ = bootstrap_task.await;
    if let Some(node) = cluster.node {
        node.shutdown().await;
    }
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("authorization server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_starts_and_stops_single_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AuthServerConfig::local(dir.path());
        run_with_shutdown(config, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await
        .expect("run should stop cleanly");
        let store = FsStore::open(dir.path()).expect("reopen");
        assert!(store.find_tenant("local").is_some());
    }
}
