mod acceptor;
mod leader;
mod outcome;
mod replica;
mod replica_api;
mod timers;

pub use acceptor::CheckpointHandle;
pub use acceptor::Watermark;
pub use outcome::Outcome;
pub use outcome::VoteOutcome;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub use replica_api::AcceptorState;
pub use replica_api::PaxosError;
pub use replica_api::ReplicaStatus;
pub use replica_api::StorageFault;
pub(crate) use replica_api::TimerTick;
