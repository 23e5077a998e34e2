use hellojohn_consensus::server::serve;
use hellojohn_consensus::{
    ClusterNode, Command, CommandKind, CommandResponse, ConsensusError, ConsensusResult, NodeId,
    NodeRole, NodeSettings, RaftConfig, StateMachineBackend,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
struct KvBackend {
    inner: Mutex<(u64, BTreeMap<String, String>)>,
}

impl KvBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().1.get(key).cloned()
    }
}

impl StateMachineBackend for KvBackend {
    fn apply(&self, index: u64, command: &Command) -> CommandResponse {
        let mut inner = self.inner.lock();
        if index <= inner.0 {
            return CommandResponse::noop();
        }
        inner.0 = index;
        let value = command.payload["value"].as_str().unwrap_or_default().to_string();
        inner.1.insert(command.key.clone(), value);
        CommandResponse::applied(Some(format!("{index}")), json!(null))
    }

    fn last_applied_index(&self) -> u64 {
        self.inner.lock().0
    }

    fn snapshot(&self) -> ConsensusResult<Vec<u8>> {
        serde_json::to_vec(&self.inner.lock().1).map_err(|err| ConsensusError::Storage(err.to_string()))
    }

    fn restore(&self, index: u64, data: &[u8]) -> ConsensusResult<()> {
        let map = serde_json::from_slice(data).map_err(|err| ConsensusError::Storage(err.to_string()))?;
        *self.inner.lock() = (index, map);
        Ok(())
    }
}

struct TestNode {
    node: ClusterNode,
    backend: Arc<KvBackend>,
    _dir: tempfile::TempDir,
}

async fn start_cluster(size: u64) -> Vec<TestNode> {
    let mut listeners = Vec::new();
    let mut members = BTreeMap::new();
    for id in 1..=size {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        members.insert(id, listener.local_addr().expect("addr").to_string());
        listeners.push((id, listener));
    }

    let mut nodes = Vec::new();
    for (id, listener) in listeners {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(KvBackend::default());
        let settings = NodeSettings {
            config: RaftConfig {
                node_id: id,
                heartbeat_interval_ms: 100,
                election_timeout_min_ms: 400,
                election_timeout_max_ms: 800,
                snapshot_every: 5,
                ..RaftConfig::default()
            },
            data_dir: dir.path().to_path_buf(),
            advertise_addr: members[&id].clone(),
            members: members.clone(),
            bootstrap: id == 1,
            tls: None,
        };
        let node = ClusterNode::start(settings, backend.clone())
            .await
            .expect("start node");
        tokio::spawn(serve(listener, node.router(), None, std::future::pending()));
        nodes.push(TestNode {
            node,
            backend,
            _dir: dir,
        });
    }
    nodes
}

async fn leader_of(nodes: &[TestNode]) -> NodeId {
    nodes[0]
        .node
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("leader elected")
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn put(key: &str, value: &str) -> Command {
    Command::new(CommandKind::UpsertScope, Some("acme"), key, json!({"value": value}), 0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_replicate_to_every_follower() {
    let nodes = start_cluster(3).await;
    let leader_id = leader_of(&nodes).await;
    let leader = nodes
        .iter()
        .find(|candidate| candidate.node.id() == leader_id)
        .expect("leader present");
    assert_eq!(leader.node.status().role, NodeRole::Leader);

    for i in 0..12 {
        let response = leader
            .node
            .submit(put(&format!("k{i}"), &format!("v{i}")))
            .await
            .expect("submit");
        assert!(response.is_applied());
    }

    let commit = leader.node.status().commit_index;
    for node in &nodes {
        let backend = node.backend.clone();
        assert!(eventually(|| backend.get("k11").as_deref() == Some("v11")).await);
        let status = node.node.status();
        assert!(eventually(|| node.node.status().last_applied >= commit).await);
        assert_eq!(status.members.len(), 3);
    }

    for node in &nodes {
        node.node.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn followers_refuse_writes_and_name_the_leader() {
    let nodes = start_cluster(3).await;
    let leader_id = leader_of(&nodes).await;
    let follower = nodes
        .iter()
        .find(|candidate| candidate.node.id() != leader_id)
        .expect("follower present");
    assert!(eventually(|| follower.node.leader_id() == Some(leader_id)).await);

    match follower.node.submit(put("k", "v")).await {
        Err(ConsensusError::NotLeader { leader_id: reported, .. }) => {
            assert_eq!(reported, Some(leader_id));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }
    assert!(!follower.node.is_leader());

    for node in &nodes {
        node.node.shutdown().await;
    }
}
