//! Command submission for the control plane.
//!
//! Every control-plane mutation is a [`Command`] handed to a
//! [`ControlPlaneLog`]. Two implementations exist: [`LocalLog`] applies
//! directly to the store in single-node mode, [`RaftLog`] replicates through
//! the consensus crate. Both apply through the same `StateMachineBackend`,
//! so the store only ever changes on the apply path.
use crate::store::FsStore;
use async_trait::async_trait;
use hellojohn_consensus::{
    ClusterNode, ClusterStatus, Command, CommandResponse, ConsensusError, NodeId, NodeRole,
    RejectReason, StateMachineBackend,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not the leader")]
    NotLeader {
        leader_id: Option<NodeId>,
        leader_addr: Option<String>,
    },
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    #[error("{message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

impl From<ConsensusError> for ClusterError {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::NotLeader {
                leader_id,
                leader_addr,
            } => ClusterError::NotLeader {
                leader_id,
                leader_addr,
            },
            other => ClusterError::Unavailable(other.to_string()),
        }
    }
}

/// Outcome of an applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub etag: Option<String>,
    pub value: Value,
}

fn into_applied(response: CommandResponse) -> Result<Applied, ClusterError> {
    match response {
        CommandResponse::Applied { etag, value } => Ok(Applied { etag, value }),
        CommandResponse::Rejected { reason, message } => {
            Err(ClusterError::Rejected { reason, message })
        }
    }
}

#[async_trait]
pub trait ControlPlaneLog: Send + Sync {
    /// Append `command` and wait until it is applied on this node.
    async fn submit(&self, command: Command) -> Result<Applied, ClusterError>;
    fn is_leader(&self) -> bool;
    fn leader_id(&self) -> Option<NodeId>;
    fn status(&self) -> ClusterStatus;
}

/// Single-node log: every node is its own leader.
pub struct LocalLog {
    node_id: NodeId,
    store: FsStore,
    gate: Mutex<()>,
}

impl LocalLog {
    pub fn new(node_id: NodeId, store: FsStore) -> Self {
        Self {
            node_id,
            store,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ControlPlaneLog for LocalLog {
    async fn submit(&self, command: Command) -> Result<Applied, ClusterError> {
        let _serial = self.gate.lock().await;
        let index = self.store.last_applied_index() + 1;
        let started = Instant::now();
        let response = self.store.apply(index, &command);
        metrics::histogram!("raft_apply_latency_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        into_applied(response)
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn leader_id(&self) -> Option<NodeId> {
        Some(self.node_id)
    }

    fn status(&self) -> ClusterStatus {
        let applied = self.store.last_applied_index();
        ClusterStatus {
            node_id: self.node_id,
            role: NodeRole::Leader,
            leader_id: Some(self.node_id),
            term: 0,
            commit_index: applied,
            last_log_index: applied,
            last_applied: applied,
            members: BTreeMap::new(),
        }
    }
}

/// Replicated log backed by a running [`ClusterNode`].
pub struct RaftLog {
    node: ClusterNode,
}

impl RaftLog {
    pub fn new(node: ClusterNode) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &ClusterNode {
        &self.node
    }

    /// Withdraw from elections while the store is degraded.
    pub fn watch_store_health(&self, store: &FsStore) -> tokio::task::JoinHandle<()> {
        let node = self.node.clone();
        let mut degraded = store.watch_degraded();
        tokio::spawn(async move {
            while degraded.changed().await.is_ok() {
                let is_degraded = *degraded.borrow_and_update();
                node.set_election_eligible(!is_degraded);
            }
        })
    }
}

#[async_trait]
impl ControlPlaneLog for RaftLog {
    async fn submit(&self, command: Command) -> Result<Applied, ClusterError> {
        let kind = command.kind.as_str();
        let response = self.node.submit(command).await.map_err(|err| {
            tracing::debug!(kind, error = %err, "command submit failed");
            ClusterError::from(err)
        })?;
        into_applied(response)
    }

    fn is_leader(&self) -> bool {
        self.node.is_leader()
    }

    fn leader_id(&self) -> Option<NodeId> {
        self.node.leader_id()
    }

    fn status(&self) -> ClusterStatus {
        self.node.status()
    }
}

/// Shared handle type held by the application state.
pub type SharedLog = Arc<dyn ControlPlaneLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tenant;
    use hellojohn_consensus::CommandKind;

    fn upsert(slug: &str) -> Command {
        let tenant = Tenant::new(slug, "Tenant", 1);
        Command::new(
            CommandKind::UpsertTenant,
            None,
            slug,
            serde_json::to_value(&tenant).expect("tenant"),
            1,
        )
    }

    #[tokio::test]
    async fn local_log_applies_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path()).expect("open");
        let log = LocalLog::new(1, store.clone());

        let applied = log.submit(upsert("acme")).await.expect("applied");
        assert!(applied.etag.is_some());
        log.submit(upsert("beta")).await.expect("applied");
        assert_eq!(store.applied_index(), 2);
        assert_eq!(log.status().commit_index, 2);
        assert!(log.is_leader());
    }

    #[tokio::test]
    async fn rejections_surface_their_reason() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path()).expect("open");
        let log = LocalLog::new(1, store);
        let delete = Command::new(CommandKind::DeleteTenant, None, "ghost", Value::Null, 1);
        match log.submit(delete).await {
            Err(ClusterError::Rejected { reason, .. }) => assert_eq!(reason, RejectReason::NotFound),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
