use crate::tls::{PeerTls, plain_client_for};
use crate::{NodeId, TypeConfig};
use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;

pub const APPEND_PATH: &str = "/raft/append";
pub const VOTE_PATH: &str = "/raft/vote";
pub const SNAPSHOT_PATH: &str = "/raft/snapshot";

/// Builds one HTTP client per peer, over mTLS when certificates are configured.
#[derive(Debug, Clone, Default)]
pub struct HttpNetworkFactory {
    tls: Option<PeerTls>,
}

impl HttpNetworkFactory {
    pub fn new(tls: Option<PeerTls>) -> Self {
        Self { tls }
    }
}

impl RaftNetworkFactory<TypeConfig> for HttpNetworkFactory {
    type Network = HttpNetwork;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        let built = match &self.tls {
            Some(tls) => tls.client_for(&node.addr),
            None => plain_client_for(&node.addr),
        };
        let peer = match built {
            Ok((client, base)) => Ok(PeerClient { client, base }),
            Err(err) => {
                tracing::error!(target_node = target, error = %err, "cannot build peer client");
                Err(err.to_string())
            }
        };
        HttpNetwork { target, peer }
    }
}

#[derive(Debug, Clone)]
struct PeerClient {
    client: reqwest::Client,
    base: String,
}

pub struct HttpNetwork {
    target: NodeId,
    peer: Result<PeerClient, String>,
}

impl HttpNetwork {
    async fn send<Req, Resp, E>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, RPCError<NodeId, BasicNode, E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let peer = self.peer.as_ref().map_err(|err| {
            RPCError::Unreachable(Unreachable::new(&io::Error::other(err.clone())))
        })?;
        let response = peer
            .client
            .post(format!("{}{path}", peer.base))
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    RPCError::Unreachable(Unreachable::new(&err))
                } else {
                    RPCError::Network(NetworkError::new(&err))
                }
            })?;
        let result: Result<Resp, E> = response
            .json()
            .await
            .map_err(|err| RPCError::Network(NetworkError::new(&err)))?;
        result.map_err(|err| RPCError::RemoteError(RemoteError::new(self.target, err)))
    }
}

impl RaftNetwork<TypeConfig> for HttpNetwork {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.send(APPEND_PATH, &rpc).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        self.send(SNAPSHOT_PATH, &rpc).await
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.send(VOTE_PATH, &rpc).await
    }
}
