use crate::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("not the leader (current leader: {leader_id:?})")]
    NotLeader {
        leader_id: Option<NodeId>,
        leader_addr: Option<String>,
    },
    #[error("invalid raft configuration: {0}")]
    Config(String),
    #[error("peer tls setup failed: {0}")]
    Tls(String),
    #[error("raft storage failure: {0}")]
    Storage(String),
    #[error("raft unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
