use crate::server::raft_router;
use crate::{
    Command, CommandResponse, ConsensusError, ConsensusResult, FileLogStore, HttpNetworkFactory,
    NodeId, PeerTls, Raft, RaftConfig, StateMachineBackend, StateMachineStore,
};
use axum::Router;
use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, ServerState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub config: RaftConfig,
    pub data_dir: PathBuf,
    /// Advertised peer address of this node (`host:port`).
    pub advertise_addr: String,
    /// All voting members, this node included.
    pub members: BTreeMap<NodeId, String>,
    /// Initialize the cluster with `members` if it has never been initialized.
    pub bootstrap: bool,
    pub tls: Option<PeerTls>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Follower,
    Candidate,
    Learner,
    Shutdown,
}

impl From<ServerState> for NodeRole {
    fn from(state: ServerState) -> Self {
        match state {
            ServerState::Leader => NodeRole::Leader,
            ServerState::Follower => NodeRole::Follower,
            ServerState::Candidate => NodeRole::Candidate,
            ServerState::Learner => NodeRole::Learner,
            ServerState::Shutdown => NodeRole::Shutdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub leader_id: Option<NodeId>,
    pub term: u64,
    pub commit_index: u64,
    pub last_log_index: u64,
    pub last_applied: u64,
    pub members: BTreeMap<NodeId, String>,
}

/// A running cluster member.
#[derive(Clone)]
pub struct ClusterNode {
    id: NodeId,
    raft: Raft,
    log: FileLogStore,
    members: BTreeMap<NodeId, String>,
}

impl ClusterNode {
    pub async fn start(
        settings: NodeSettings,
        backend: Arc<dyn StateMachineBackend>,
    ) -> ConsensusResult<Self> {
        let id = settings.config.node_id;
        let config = settings.config.to_openraft()?;
        let log = FileLogStore::open(settings.data_dir.join("log"))?;
        let state_machine = StateMachineStore::open(settings.data_dir.join("state"), backend)?;
        let network = HttpNetworkFactory::new(settings.tls.clone());

        let raft = Raft::new(id, config, network, log.clone(), state_machine)
            .await
            .map_err(|err| ConsensusError::Unavailable(err.to_string()))?;

        let mut members = settings.members.clone();
        members
            .entry(id)
            .or_insert_with(|| settings.advertise_addr.clone());

        if settings.bootstrap {
            let initialized = raft
                .is_initialized()
                .await
                .map_err(|err| ConsensusError::Unavailable(err.to_string()))?;
            if !initialized {
                let nodes: BTreeMap<NodeId, BasicNode> = members
                    .iter()
                    .map(|(node_id, addr)| (*node_id, BasicNode::new(addr)))
                    .collect();
                match raft.initialize(nodes).await {
                    Ok(()) => tracing::info!(node_id = id, members = members.len(), "cluster initialized"),
                    Err(err) => tracing::warn!(node_id = id, error = %err, "cluster initialization skipped"),
                }
            }
        }

        tracing::info!(node_id = id, addr = %settings.advertise_addr, "raft node started");
        Ok(Self {
            id,
            raft,
            log,
            members,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn raft(&self) -> &Raft {
        &self.raft
    }

    /// Peer RPC routes for this node.
    pub fn router(&self) -> Router {
        raft_router(self.raft.clone())
    }

    /// Append `command` through the leader and wait for it to apply locally.
    pub async fn submit(&self, command: Command) -> ConsensusResult<CommandResponse> {
        match self.raft.client_write(command).await {
            Ok(response) => Ok(response.data),
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                Err(ConsensusError::NotLeader {
                    leader_id: forward.leader_id,
                    leader_addr: forward.leader_node.map(|node| node.addr),
                })
            }
            Err(err) => Err(ConsensusError::Unavailable(err.to_string())),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.id)
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.raft.metrics().borrow().current_leader
    }

    pub fn status(&self) -> ClusterStatus {
        let metrics = self.raft.metrics().borrow().clone();
        let last_applied = metrics.last_applied.map(|log_id| log_id.index).unwrap_or(0);
        let commit_index = self.log.committed_index().unwrap_or(0).max(last_applied);
        let members = metrics
            .membership_config
            .membership()
            .nodes()
            .map(|(node_id, node)| (*node_id, node.addr.clone()))
            .collect::<BTreeMap<_, _>>();
        ClusterStatus {
            node_id: self.id,
            role: metrics.state.into(),
            leader_id: metrics.current_leader,
            term: metrics.current_term,
            commit_index,
            last_log_index: metrics.last_log_index.unwrap_or(0),
            last_applied,
            members: if members.is_empty() {
                self.members.clone()
            } else {
                members
            },
        }
    }

    /// Allow or forbid this node from starting elections.
    pub fn set_election_eligible(&self, eligible: bool) {
        self.raft.runtime_config().elect(eligible);
        tracing::info!(node_id = self.id, eligible, "election eligibility changed");
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> ConsensusResult<NodeId> {
        let mut metrics = self.raft.metrics();
        let wait = async {
            loop {
                if let Some(leader) = metrics.borrow().current_leader {
                    return Ok(leader);
                }
                if metrics.changed().await.is_err() {
                    return Err(ConsensusError::Unavailable("raft stopped".to_string()));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ConsensusError::Unavailable("no leader elected".to_string()))?
    }

    pub async fn shutdown(&self) {
        if let Err(err) = self.raft.shutdown().await {
            tracing::warn!(node_id = self.id, error = %err, "raft shutdown failed");
        }
    }
}
