mod codec;
mod message;

pub use codec::decode_packet;
pub use codec::encode_packet;
pub use codec::CodecError;
pub use message::Accept;
pub use message::Begin;
pub use message::Classification;
pub use message::Collect;
pub use message::Heartbeat;
pub use message::Last;
pub use message::Learned;
pub use message::Need;
pub use message::NodeId;
pub use message::OldRound;
pub use message::Packet;
pub use message::PaxosMessage;
pub use message::Proposal;
pub use message::Round;
pub use message::SeqNum;
pub use message::NO_ROUND;
pub use message::UNKNOWN_SEQ;

// Checkpoint handles reuse the wire encoding of a Collect.
pub(crate) use codec::collect_from_proto;
pub(crate) use codec::decode_versioned;
pub(crate) use codec::encode_versioned;
pub(crate) use codec::ProtoCollect;
