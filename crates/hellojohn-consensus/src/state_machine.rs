//! `openraft` state machine that forwards committed commands to a
//! [`StateMachineBackend`] and checkpoints the applied position on disk.
use crate::durable::{read_json, write_json};
use crate::{CommandResponse, ConsensusResult, NodeId, StateMachineBackend, TypeConfig};
use openraft::storage::{RaftStateMachine, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, OptionalSend, RaftSnapshotBuilder, SnapshotMeta,
    StorageError, StorageIOError, StoredMembership,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const APPLIED_FILE: &str = "applied.json";
const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AppliedState {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSnapshot {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: Vec<u8>,
}

#[derive(Clone)]
pub struct StateMachineStore {
    backend: Arc<dyn StateMachineBackend>,
    state: Arc<RwLock<AppliedState>>,
    current: Arc<Mutex<Option<StoredSnapshot>>>,
    // Held while applying a batch or capturing a snapshot so the captured
    // data always matches the captured log id.
    apply_lock: Arc<Mutex<()>>,
    snapshot_seq: Arc<AtomicU64>,
    dir: PathBuf,
}

impl StateMachineStore {
    pub fn open(dir: impl AsRef<Path>, backend: Arc<dyn StateMachineBackend>) -> ConsensusResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let state: AppliedState = read_json(&dir.join(APPLIED_FILE))?.unwrap_or_default();
        let current: Option<StoredSnapshot> = read_json(&dir.join(SNAPSHOT_FILE))?;
        if let Some(last) = state.last_applied
            && backend.last_applied_index() < last.index
        {
            tracing::warn!(
                checkpoint = last.index,
                backend = backend.last_applied_index(),
                "backend is behind the applied checkpoint"
            );
        }
        Ok(Self {
            backend,
            state: Arc::new(RwLock::new(state)),
            current: Arc::new(Mutex::new(current)),
            apply_lock: Arc::new(Mutex::new(())),
            snapshot_seq: Arc::new(AtomicU64::new(0)),
            dir,
        })
    }

    pub fn last_applied_index(&self) -> Option<u64> {
        self.state.read().last_applied.map(|log_id| log_id.index)
    }

    fn persist_state(&self, state: &AppliedState) -> Result<(), StorageError<NodeId>> {
        write_json(&self.dir.join(APPLIED_FILE), state).map_err(|err| StorageError::IO {
            source: StorageIOError::write_state_machine(&err),
        })
    }

    fn persist_snapshot(&self, stored: &StoredSnapshot) -> Result<(), StorageError<NodeId>> {
        write_json(&self.dir.join(SNAPSHOT_FILE), stored).map_err(|err| StorageError::IO {
            source: StorageIOError::write_snapshot(Some(stored.meta.signature()), &err),
        })
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachineStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let (state, data) = {
            let _guard = self.apply_lock.lock();
            let state = self.state.read().clone();
            let data = self.backend.snapshot().map_err(|err| StorageError::IO {
                source: StorageIOError::read_state_machine(&err),
            })?;
            (state, data)
        };

        let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match state.last_applied {
            Some(last) => format!("{}-{}-{seq}", last.leader_id, last.index),
            None => format!("--{seq}"),
        };
        let meta = SnapshotMeta {
            last_log_id: state.last_applied,
            last_membership: state.last_membership,
            snapshot_id,
        };
        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        self.persist_snapshot(&stored)?;
        *self.current.lock() = Some(stored);
        tracing::info!(snapshot_id = %meta.snapshot_id, bytes = data.len(), "snapshot built");

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for StateMachineStore {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        let state = self.state.read();
        Ok((state.last_applied, state.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let _guard = self.apply_lock.lock();
        let mut state = self.state.read().clone();
        let mut responses = Vec::new();

        for entry in entries {
            state.last_applied = Some(entry.log_id);
            match entry.payload {
                EntryPayload::Blank => responses.push(CommandResponse::noop()),
                EntryPayload::Normal(command) => {
                    let started = Instant::now();
                    let response = self.backend.apply(entry.log_id.index, &command);
                    metrics::histogram!("raft_apply_latency_ms")
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    tracing::debug!(
                        index = entry.log_id.index,
                        kind = command.kind.as_str(),
                        applied = response.is_applied(),
                        "command applied"
                    );
                    responses.push(response);
                }
                EntryPayload::Membership(membership) => {
                    state.last_membership = StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(CommandResponse::noop());
                }
            }
        }

        self.persist_state(&state)?;
        *self.state.write() = state;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = (*snapshot).into_inner();
        let index = meta.last_log_id.map(|log_id| log_id.index).unwrap_or(0);
        tracing::info!(snapshot_id = %meta.snapshot_id, index, bytes = data.len(), "installing snapshot");

        let _guard = self.apply_lock.lock();
        self.backend.restore(index, &data).map_err(|err| StorageError::IO {
            source: StorageIOError::write_snapshot(Some(meta.signature()), &err),
        })?;
        let state = AppliedState {
            last_applied: meta.last_log_id,
            last_membership: meta.last_membership.clone(),
        };
        self.persist_state(&state)?;
        let stored = StoredSnapshot {
            meta: meta.clone(),
            data,
        };
        self.persist_snapshot(&stored)?;
        *self.state.write() = state;
        *self.current.lock() = Some(stored);
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        Ok(self.current.lock().as_ref().map(|stored| Snapshot {
            meta: stored.meta.clone(),
            snapshot: Box::new(Cursor::new(stored.data.clone())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, CommandKind, ConsensusError};
    use openraft::{CommittedLeaderId, Membership};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Default)]
    struct Recorder {
        inner: Mutex<(u64, Vec<String>)>,
    }

    impl StateMachineBackend for Recorder {
        fn apply(&self, index: u64, command: &Command) -> CommandResponse {
            let mut inner = self.inner.lock();
            if index <= inner.0 {
                return CommandResponse::noop();
            }
            inner.0 = index;
            inner.1.push(command.key.clone());
            CommandResponse::applied(Some(format!("etag-{index}")), json!(null))
        }

        fn last_applied_index(&self) -> u64 {
            self.inner.lock().0
        }

        fn snapshot(&self) -> ConsensusResult<Vec<u8>> {
            serde_json::to_vec(&self.inner.lock().1).map_err(|err| ConsensusError::Storage(err.to_string()))
        }

        fn restore(&self, index: u64, data: &[u8]) -> ConsensusResult<()> {
            let keys: Vec<String> =
                serde_json::from_slice(data).map_err(|err| ConsensusError::Storage(err.to_string()))?;
            *self.inner.lock() = (index, keys);
            Ok(())
        }
    }

    fn normal(index: u64, key: &str) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Normal(Command::new(
                CommandKind::UpsertClient,
                Some("acme"),
                key,
                json!({}),
                0,
            )),
        }
    }

    #[tokio::test]
    async fn apply_checkpoints_position_and_membership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(Recorder::default());
        let mut sm = StateMachineStore::open(dir.path(), backend.clone()).expect("open");

        let membership = Membership::new(
            vec![BTreeSet::from([1])],
            BTreeMap::from([(1, BasicNode::new("127.0.0.1:9000"))]),
        );
        let entries = vec![
            Entry {
                log_id: LogId::new(CommittedLeaderId::new(1, 1), 1),
                payload: EntryPayload::Membership(membership),
            },
            normal(2, "web"),
            normal(3, "cli"),
        ];
        let responses = sm.apply(entries).await.expect("apply");
        assert_eq!(responses.len(), 3);
        assert_eq!(
            responses[1],
            CommandResponse::applied(Some("etag-2".to_string()), json!(null))
        );

        let mut reopened = StateMachineStore::open(dir.path(), backend).expect("reopen");
        let (applied, membership) = reopened.applied_state().await.expect("state");
        assert_eq!(applied.map(|log_id| log_id.index), Some(3));
        assert_eq!(membership.log_id().map(|log_id| log_id.index), Some(1));
    }

    #[tokio::test]
    async fn snapshot_installs_on_a_fresh_machine() {
        let leader_dir = tempfile::tempdir().expect("tempdir");
        let leader_backend = Arc::new(Recorder::default());
        let mut leader = StateMachineStore::open(leader_dir.path(), leader_backend).expect("open");
        leader
            .apply(vec![normal(1, "a"), normal(2, "b")])
            .await
            .expect("apply");
        let mut builder = leader.get_snapshot_builder().await;
        let snapshot = builder.build_snapshot().await.expect("snapshot");
        assert_eq!(snapshot.meta.last_log_id.map(|log_id| log_id.index), Some(2));

        let follower_dir = tempfile::tempdir().expect("tempdir");
        let follower_backend = Arc::new(Recorder::default());
        let mut follower =
            StateMachineStore::open(follower_dir.path(), follower_backend.clone()).expect("open");
        follower
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .expect("install");

        assert_eq!(follower_backend.last_applied_index(), 2);
        assert_eq!(follower_backend.inner.lock().1, vec!["a", "b"]);
        assert_eq!(follower.last_applied_index(), Some(2));
        let current = follower.get_current_snapshot().await.expect("current");
        assert!(current.is_some());

        // Entries already covered by the snapshot are skipped by the backend.
        follower.apply(vec![normal(2, "b")]).await.expect("replay");
        assert_eq!(follower_backend.inner.lock().1.len(), 2);
    }
}
