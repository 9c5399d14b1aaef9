use crate::commitlog::Offset;
use crate::messages::{CodecError, Collect, SeqNum};
use crate::replica::acceptor::Watermark;
use std::io;

/// Deadlines the replica actor schedules on itself. Each carries the generation it was armed
/// with so a tick that raced with a re-arm or cancellation can be told apart and dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum TimerTick {
    LeaderInteraction { seq_num: SeqNum, generation: u64 },
    RecoveryWatchdog { generation: u64 },
    LeaseHeartbeat { generation: u64 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcceptorState {
    Active,
    Recovering,
    /// Peers could no longer supply the missing history. Only a checkpoint from another replica
    /// can bring this replica back.
    OutOfDate,
}

/// Point-in-time view of a replica, mostly for tests and operators.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicaStatus {
    pub acceptor_state: AcceptorState,
    pub watermark: Watermark,
    pub last_collect: Option<Collect>,
    pub ignored_collects: u64,
    pub received_heartbeats: u64,
    pub active_leader: Option<SeqNum>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    #[error("replica is out of date or shutting down")]
    Inactive,

    #[error("replica halted after a storage fault: {0}")]
    Halted(String),

    #[error("storage fault")]
    Storage(#[from] StorageFault),

    #[error("checkpoint handle isn't attached to a running replica")]
    DetachedCheckpoint,

    #[error("replica event loop has stopped")]
    Stopped,
}

/// Failure of the durable log. The replica cannot safely continue past one of these.
#[derive(Debug, thiserror::Error)]
pub enum StorageFault {
    #[error("failed to open log")]
    Open(#[source] io::Error),

    #[error("failed to write log record")]
    Write(#[source] io::Error),

    #[error("failed to replay log")]
    Replay(#[source] io::Error),

    #[error("failed to mark log at {0:?}")]
    Mark(Offset, #[source] io::Error),

    #[error("undecodable log record at {0:?}")]
    Corrupt(Offset, #[source] CodecError),

    #[error("failed to encode log record")]
    Encode(#[source] CodecError),
}
