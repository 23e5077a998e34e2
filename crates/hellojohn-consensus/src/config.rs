use crate::{ConsensusError, ConsensusResult, NodeId};
use openraft::{Config, SnapshotPolicy};
use std::sync::Arc;

/// Timing and snapshot settings for one cluster member.
///
/// ```
/// use hellojohn_consensus::RaftConfig;
///
/// let config = RaftConfig::default();
/// assert!(config.election_timeout_min_ms > config.heartbeat_interval_ms);
/// ```
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub cluster_name: String,
    pub node_id: NodeId,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Log entries applied between snapshots.
    pub snapshot_every: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            cluster_name: "hellojohn".into(),
            node_id: 1,
            heartbeat_interval_ms: 250,
            election_timeout_min_ms: 800,
            election_timeout_max_ms: 1600,
            snapshot_every: 1000,
        }
    }
}

impl RaftConfig {
    pub fn to_openraft(&self) -> ConsensusResult<Arc<Config>> {
        if self.snapshot_every == 0 {
            return Err(ConsensusError::Config(
                "snapshot interval must be positive".to_string(),
            ));
        }
        let config = Config {
            cluster_name: self.cluster_name.clone(),
            heartbeat_interval: self.heartbeat_interval_ms,
            election_timeout_min: self.election_timeout_min_ms,
            election_timeout_max: self.election_timeout_max_ms,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(self.snapshot_every),
            snapshot_max_chunk_size: 1024 * 1024,
            ..Default::default()
        };
        let config = config
            .validate()
            .map_err(|err| ConsensusError::Config(err.to_string()))?;
        Ok(Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = RaftConfig::default();
        assert_eq!(config.cluster_name, "hellojohn");
        let raft = config.to_openraft().expect("valid");
        assert_eq!(raft.heartbeat_interval, 250);
    }

    #[test]
    fn inverted_election_window_is_rejected() {
        let config = RaftConfig {
            election_timeout_min_ms: 2000,
            election_timeout_max_ms: 1000,
            ..RaftConfig::default()
        };
        assert!(matches!(config.to_openraft(), Err(ConsensusError::Config(_))));
    }

    #[test]
    fn zero_snapshot_interval_is_rejected() {
        let config = RaftConfig {
            snapshot_every: 0,
            ..RaftConfig::default()
        };
        assert!(config.to_openraft().is_err());
    }
}
