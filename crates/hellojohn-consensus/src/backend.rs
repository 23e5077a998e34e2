use crate::{Command, CommandResponse, ConsensusResult};

/// The state the log drives.
///
/// `apply` is called in strict index order on every node. An implementation
/// must remember the highest index it has applied and treat anything at or
/// below it as already done, because the log replays entries after a crash
/// that landed between the backend write and the applied-state checkpoint.
pub trait StateMachineBackend: Send + Sync + 'static {
    fn apply(&self, index: u64, command: &Command) -> CommandResponse;

    fn last_applied_index(&self) -> u64;

    /// Serialize the full state.
    fn snapshot(&self) -> ConsensusResult<Vec<u8>>;

    /// Replace the full state with a snapshot taken at `index`.
    fn restore(&self, index: u64, data: &[u8]) -> ConsensusResult<()>;
}
