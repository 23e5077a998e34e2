//! Replicated command log for the hellojohn control plane.
//!
//! Built on `openraft`: a durable file-backed log ([`FileLogStore`]), a state
//! machine that hands committed commands to a pluggable
//! [`StateMachineBackend`] ([`StateMachineStore`]), and an HTTP network that
//! speaks to peers over mutual TLS ([`network`], [`server`], [`tls`]).
//! [`ClusterNode`] ties the pieces together for the service.
use openraft::BasicNode;
use std::io::Cursor;

pub mod backend;
pub mod command;
pub mod config;
pub mod durable;
mod errors;
pub mod log_store;
pub mod network;
pub mod node;
pub mod server;
pub mod state_machine;
pub mod tls;

pub use backend::StateMachineBackend;
pub use command::{Command, CommandKind, CommandResponse, RejectReason};
pub use config::RaftConfig;
pub use errors::{ConsensusError, ConsensusResult};
pub use log_store::FileLogStore;
pub use network::HttpNetworkFactory;
pub use node::{ClusterNode, ClusterStatus, NodeRole, NodeSettings};
pub use state_machine::StateMachineStore;
pub use tls::PeerTls;

pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Type configuration for the control-plane log.
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

pub type Raft = openraft::Raft<TypeConfig>;
