//! File-backed raft log.
//!
//! Layout under the store directory:
//!
//! ```text
//! log/00000000000000000042.json   one entry per file, named by index
//! vote.json                       last persisted vote
//! committed.json                  last committed log id
//! purged.json                     last purged log id
//! ```
//!
//! Every file is written with [`write_json`], so a crash never leaves a torn
//! entry behind. The whole log is mirrored in memory; snapshots keep it short.
use crate::durable::{read_json, remove_durable, write_json};
use crate::{ConsensusResult, NodeId, TypeConfig};
use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{
    Entry, LogId, OptionalSend, RaftLogReader, StorageError, StorageIOError, Vote,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_DIR: &str = "log";
const VOTE_FILE: &str = "vote.json";
const COMMITTED_FILE: &str = "committed.json";
const PURGED_FILE: &str = "purged.json";

#[derive(Debug)]
struct LogInner {
    dir: PathBuf,
    entries: BTreeMap<u64, Entry<TypeConfig>>,
    vote: Option<Vote<NodeId>>,
    committed: Option<LogId<NodeId>>,
    last_purged: Option<LogId<NodeId>>,
}

impl LogInner {
    fn entry_path(&self, index: u64) -> PathBuf {
        self.dir.join(LOG_DIR).join(format!("{index:020}.json"))
    }
}

#[derive(Debug, Clone)]
pub struct FileLogStore {
    inner: Arc<Mutex<LogInner>>,
}

impl FileLogStore {
    /// Open (or create) a log under `dir`, loading any persisted entries.
    pub fn open(dir: impl AsRef<Path>) -> ConsensusResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let log_dir = dir.join(LOG_DIR);
        fs::create_dir_all(&log_dir)?;

        let mut entries = BTreeMap::new();
        for item in fs::read_dir(&log_dir)? {
            let path = item?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = read_json::<Entry<TypeConfig>>(&path)? {
                entries.insert(entry.log_id.index, entry);
            }
        }
        let vote = read_json(&dir.join(VOTE_FILE))?;
        let committed = read_json(&dir.join(COMMITTED_FILE))?;
        let last_purged = read_json(&dir.join(PURGED_FILE))?;
        tracing::debug!(entries = entries.len(), dir = %dir.display(), "raft log opened");

        Ok(Self {
            inner: Arc::new(Mutex::new(LogInner {
                dir,
                entries,
                vote,
                committed,
                last_purged,
            })),
        })
    }

    pub fn committed_index(&self) -> Option<u64> {
        self.inner.lock().committed.map(|log_id| log_id.index)
    }

    pub fn last_log_index(&self) -> Option<u64> {
        let inner = self.inner.lock();
        inner
            .entries
            .keys()
            .next_back()
            .copied()
            .or(inner.last_purged.map(|log_id| log_id.index))
    }
}

impl RaftLogReader<TypeConfig> for FileLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(range)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

impl RaftLogStorage<TypeConfig> for FileLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let inner = self.inner.lock();
        let last_log_id = inner
            .entries
            .values()
            .next_back()
            .map(|entry| entry.log_id)
            .or(inner.last_purged);
        Ok(LogState {
            last_purged_log_id: inner.last_purged,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock();
        write_json(&inner.dir.join(VOTE_FILE), vote).map_err(|err| StorageError::IO {
            source: StorageIOError::write_vote(&err),
        })?;
        inner.vote = Some(vote.clone());
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().vote.clone())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock();
        write_json(&inner.dir.join(COMMITTED_FILE), &committed).map_err(|err| {
            StorageError::IO {
                source: StorageIOError::write(&err),
            }
        })?;
        inner.committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().committed)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        {
            let mut inner = self.inner.lock();
            for entry in entries {
                let path = inner.entry_path(entry.log_id.index);
                write_json(&path, &entry).map_err(|err| StorageError::IO {
                    source: StorageIOError::write_log_entry(entry.log_id, &err),
                })?;
                inner.entries.insert(entry.log_id.index, entry);
            }
        }
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock();
        let doomed: Vec<u64> = inner.entries.range(log_id.index..).map(|(index, _)| *index).collect();
        for index in doomed {
            remove_durable(&inner.entry_path(index)).map_err(|err| StorageError::IO {
                source: StorageIOError::write_logs(&err),
            })?;
            inner.entries.remove(&index);
        }
        tracing::debug!(from = log_id.index, "raft log truncated");
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut inner = self.inner.lock();
        write_json(&inner.dir.join(PURGED_FILE), &log_id).map_err(|err| StorageError::IO {
            source: StorageIOError::write_logs(&err),
        })?;
        inner.last_purged = Some(log_id);
        let doomed: Vec<u64> = inner
            .entries
            .range(..=log_id.index)
            .map(|(index, _)| *index)
            .collect();
        for index in doomed {
            remove_durable(&inner.entry_path(index)).map_err(|err| StorageError::IO {
                source: StorageIOError::write_logs(&err),
            })?;
            inner.entries.remove(&index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, CommandKind};
    use openraft::{CommittedLeaderId, EntryPayload};
    use serde_json::json;

    fn log_id(term: u64, index: u64) -> LogId<NodeId> {
        LogId::new(CommittedLeaderId::new(term, 1), index)
    }

    fn entry(term: u64, index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: log_id(term, index),
            payload: EntryPayload::Normal(Command::new(
                CommandKind::UpsertScope,
                Some("acme"),
                format!("scope{index}"),
                json!({}),
                0,
            )),
        }
    }

    fn insert(store: &FileLogStore, entries: Vec<Entry<TypeConfig>>) {
        let mut inner = store.inner.lock();
        for entry in entries {
            let path = inner.entry_path(entry.log_id.index);
            write_json(&path, &entry).expect("write entry");
            inner.entries.insert(entry.log_id.index, entry);
        }
    }

    #[tokio::test]
    async fn entries_and_vote_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FileLogStore::open(dir.path()).expect("open");
        insert(&store, (1..=3).map(|i| entry(1, i)).collect());
        store.save_vote(&Vote::new(2, 1)).await.expect("vote");
        store.save_committed(Some(log_id(1, 2))).await.expect("committed");

        let mut reopened = FileLogStore::open(dir.path()).expect("reopen");
        let state = reopened.get_log_state().await.expect("state");
        assert_eq!(state.last_log_id, Some(log_id(1, 3)));
        assert_eq!(reopened.read_vote().await.expect("vote"), Some(Vote::new(2, 1)));
        assert_eq!(reopened.committed_index(), Some(2));
        let entries = reopened.try_get_log_entries(2..).await.expect("entries");
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn truncate_and_purge_remove_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FileLogStore::open(dir.path()).expect("open");
        insert(&store, (1..=5).map(|i| entry(1, i)).collect());

        store.truncate(log_id(1, 4)).await.expect("truncate");
        assert_eq!(store.last_log_index(), Some(3));

        store.purge(log_id(1, 2)).await.expect("purge");
        let state = store.get_log_state().await.expect("state");
        assert_eq!(state.last_purged_log_id, Some(log_id(1, 2)));
        assert_eq!(state.last_log_id, Some(log_id(1, 3)));

        let reopened = FileLogStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.inner.lock().entries.len(), 1);
    }

    #[tokio::test]
    async fn fully_purged_log_reports_purged_id_as_last() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FileLogStore::open(dir.path()).expect("open");
        insert(&store, vec![entry(1, 1)]);
        store.purge(log_id(1, 1)).await.expect("purge");
        let state = store.get_log_state().await.expect("state");
        assert_eq!(state.last_log_id, Some(log_id(1, 1)));
    }
}
