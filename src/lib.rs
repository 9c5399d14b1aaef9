mod actor;
mod api;
mod commitlog;
mod failure_detector;
mod messages;
mod replica;
mod transport;

pub use api::try_create_paxos_client;
pub use api::OutcomeStream;
pub use api::PaxosClient;
pub use api::PaxosClientConfig;
pub use api::PaxosClientCreationError;
pub use api::PaxosOptions;
pub use commitlog::InMemoryLog;
pub use commitlog::LogStorage;
pub use commitlog::Offset;
pub use failure_detector::FailureDetector;
pub use failure_detector::FailureDetectorError;
pub use failure_detector::MemberInfo;
pub use failure_detector::Members;
pub use messages::decode_packet;
pub use messages::encode_packet;
pub use messages::Accept;
pub use messages::Begin;
pub use messages::CodecError;
pub use messages::Collect;
pub use messages::Heartbeat;
pub use messages::Last;
pub use messages::Learned;
pub use messages::Need;
pub use messages::NodeId;
pub use messages::OldRound;
pub use messages::Packet;
pub use messages::PaxosMessage;
pub use messages::Proposal;
pub use messages::Round;
pub use messages::SeqNum;
pub use messages::NO_ROUND;
pub use messages::UNKNOWN_SEQ;
pub use replica::AcceptorState;
pub use replica::CheckpointHandle;
pub use replica::Outcome;
pub use replica::PaxosError;
pub use replica::ReplicaStatus;
pub use replica::StorageFault;
pub use replica::VoteOutcome;
pub use replica::Watermark;
pub use transport::Destination;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::Stream;
pub use transport::Transport;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
