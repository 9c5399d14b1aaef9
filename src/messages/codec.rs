use crate::messages::message::{
    Accept, Begin, Collect, Heartbeat, Last, Learned, Need, NodeId, OldRound, Packet, PaxosMessage, Proposal,
};
use bytes::Bytes;
use prost::Message;
use std::net::SocketAddr;

/// Byte representation of a packet, both on the wire and as a durable log record:
///
/// ```text
/// +---+-----------------------------...-+
/// |Vrs|  ProtoPacket (variable size) ... |
/// +---+-----------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `ProtoPacket` - prost encoding of source address and message
const PACKET_FORMAT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed payload")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to encode payload")]
    Encode(#[from] prost::EncodeError),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid node address `{0}`")]
    InvalidAddress(String),
    #[error("unknown proposal kind {0}")]
    UnknownProposalKind(i32),
}

pub fn encode_packet(packet: &Packet) -> Result<Bytes, CodecError> {
    encode_versioned(&ProtoPacket::from(packet))
}

pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    let proto: ProtoPacket = decode_versioned(bytes)?;
    Packet::try_from_proto(proto)
}

pub(crate) fn encode_versioned<M: Message>(message: &M) -> Result<Bytes, CodecError> {
    let mut buf = Vec::with_capacity(1 + message.encoded_len());
    buf.push(PACKET_FORMAT_VERSION);
    message.encode(&mut buf)?;

    Ok(Bytes::from(buf))
}

pub(crate) fn decode_versioned<M: Message + Default>(bytes: &[u8]) -> Result<M, CodecError> {
    match bytes.first() {
        None => Err(CodecError::Empty),
        Some(&PACKET_FORMAT_VERSION) => Ok(M::decode(&bytes[1..])?),
        Some(&other) => Err(CodecError::UnsupportedVersion(other)),
    }
}

// ------- Protobuf types --------

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoPacket {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(oneof = "proto_packet::Body", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub body: Option<proto_packet::Body>,
}

pub(crate) mod proto_packet {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "2")]
        Collect(super::ProtoCollect),
        #[prost(message, tag = "3")]
        Last(super::ProtoLast),
        #[prost(message, tag = "4")]
        Begin(super::ProtoBegin),
        #[prost(message, tag = "5")]
        Accept(super::ProtoRoundRef),
        #[prost(message, tag = "6")]
        Learned(super::ProtoRoundRef),
        #[prost(message, tag = "7")]
        OldRound(super::ProtoOldRound),
        #[prost(message, tag = "8")]
        Need(super::ProtoNeed),
        #[prost(message, tag = "9")]
        OutOfDate(super::ProtoOutOfDate),
        #[prost(message, tag = "10")]
        Heartbeat(super::ProtoHeartbeat),
    }
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoCollect {
    #[prost(sint64, tag = "1")]
    pub seq_num: i64,
    #[prost(sint64, tag = "2")]
    pub round: i64,
    #[prost(string, tag = "3")]
    pub leader: String,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoLast {
    #[prost(sint64, tag = "1")]
    pub seq_num: i64,
    #[prost(sint64, tag = "2")]
    pub low_watermark: i64,
    #[prost(sint64, tag = "3")]
    pub round: i64,
    #[prost(message, optional, tag = "4")]
    pub value: Option<ProtoProposal>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoBegin {
    #[prost(sint64, tag = "1")]
    pub seq_num: i64,
    #[prost(sint64, tag = "2")]
    pub round: i64,
    #[prost(message, optional, tag = "3")]
    pub value: Option<ProtoProposal>,
}

/// Shared by Accept and Learned, which only name an instance and a round.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoRoundRef {
    #[prost(sint64, tag = "1")]
    pub seq_num: i64,
    #[prost(sint64, tag = "2")]
    pub round: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoOldRound {
    #[prost(sint64, tag = "1")]
    pub seq_num: i64,
    #[prost(sint64, tag = "2")]
    pub last_round: i64,
    // Empty when the acceptor hasn't seen a leader.
    #[prost(string, tag = "3")]
    pub leader: String,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoNeed {
    #[prost(sint64, tag = "1")]
    pub min_seq: i64,
    #[prost(sint64, tag = "2")]
    pub max_seq: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoOutOfDate {}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoHeartbeat {
    #[prost(bytes, tag = "1")]
    pub metadata: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProtoProposal {
    #[prost(enumeration = "ProposalKind", tag = "1")]
    pub kind: i32,
    #[prost(bytes, tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub(crate) enum ProposalKind {
    NoValue = 0,
    Heartbeat = 1,
    Value = 2,
}

// ------- Conversions --------

pub(crate) fn parse_node_id(addr: &str) -> Result<NodeId, CodecError> {
    addr.parse::<SocketAddr>()
        .map(NodeId::new)
        .map_err(|_| CodecError::InvalidAddress(addr.to_string()))
}

impl From<&Proposal> for ProtoProposal {
    fn from(proposal: &Proposal) -> Self {
        match proposal {
            Proposal::NoValue => ProtoProposal {
                kind: ProposalKind::NoValue as i32,
                data: vec![],
            },
            Proposal::Heartbeat => ProtoProposal {
                kind: ProposalKind::Heartbeat as i32,
                data: vec![],
            },
            Proposal::Value(data) => ProtoProposal {
                kind: ProposalKind::Value as i32,
                data: data.to_vec(),
            },
        }
    }
}

fn proposal_from_proto(proto: Option<ProtoProposal>) -> Result<Proposal, CodecError> {
    let proto = proto.ok_or(CodecError::MissingField("value"))?;
    match ProposalKind::from_i32(proto.kind) {
        Some(ProposalKind::NoValue) => Ok(Proposal::NoValue),
        Some(ProposalKind::Heartbeat) => Ok(Proposal::Heartbeat),
        Some(ProposalKind::Value) => Ok(Proposal::Value(Bytes::from(proto.data))),
        None => Err(CodecError::UnknownProposalKind(proto.kind)),
    }
}

impl From<&Collect> for ProtoCollect {
    fn from(collect: &Collect) -> Self {
        ProtoCollect {
            seq_num: collect.seq_num,
            round: collect.round,
            leader: collect.leader.to_string(),
        }
    }
}

pub(crate) fn collect_from_proto(proto: ProtoCollect) -> Result<Collect, CodecError> {
    Ok(Collect {
        seq_num: proto.seq_num,
        round: proto.round,
        leader: parse_node_id(&proto.leader)?,
    })
}

impl From<&Packet> for ProtoPacket {
    fn from(packet: &Packet) -> Self {
        use proto_packet::Body;

        let body = match &packet.message {
            PaxosMessage::Collect(m) => Body::Collect(ProtoCollect::from(m)),
            PaxosMessage::Last(m) => Body::Last(ProtoLast {
                seq_num: m.seq_num,
                low_watermark: m.low_watermark,
                round: m.round,
                value: Some(ProtoProposal::from(&m.value)),
            }),
            PaxosMessage::Begin(m) => Body::Begin(ProtoBegin {
                seq_num: m.seq_num,
                round: m.round,
                value: Some(ProtoProposal::from(&m.value)),
            }),
            PaxosMessage::Accept(m) => Body::Accept(ProtoRoundRef {
                seq_num: m.seq_num,
                round: m.round,
            }),
            PaxosMessage::Learned(m) => Body::Learned(ProtoRoundRef {
                seq_num: m.seq_num,
                round: m.round,
            }),
            PaxosMessage::OldRound(m) => Body::OldRound(ProtoOldRound {
                seq_num: m.seq_num,
                last_round: m.last_round,
                leader: m.leader.map(|l| l.to_string()).unwrap_or_default(),
            }),
            PaxosMessage::Need(m) => Body::Need(ProtoNeed {
                min_seq: m.min_seq,
                max_seq: m.max_seq,
            }),
            PaxosMessage::OutOfDate => Body::OutOfDate(ProtoOutOfDate {}),
            PaxosMessage::Heartbeat(m) => Body::Heartbeat(ProtoHeartbeat {
                metadata: m.metadata.to_vec(),
            }),
        };

        ProtoPacket {
            source: packet.source.to_string(),
            body: Some(body),
        }
    }
}

impl Packet {
    fn try_from_proto(proto: ProtoPacket) -> Result<Self, CodecError> {
        use proto_packet::Body;

        let source = parse_node_id(&proto.source)?;
        let message = match proto.body.ok_or(CodecError::MissingField("body"))? {
            Body::Collect(m) => PaxosMessage::Collect(collect_from_proto(m)?),
            Body::Last(m) => PaxosMessage::Last(Last {
                seq_num: m.seq_num,
                low_watermark: m.low_watermark,
                round: m.round,
                value: proposal_from_proto(m.value)?,
            }),
            Body::Begin(m) => PaxosMessage::Begin(Begin {
                seq_num: m.seq_num,
                round: m.round,
                value: proposal_from_proto(m.value)?,
            }),
            Body::Accept(m) => PaxosMessage::Accept(Accept {
                seq_num: m.seq_num,
                round: m.round,
            }),
            Body::Learned(m) => PaxosMessage::Learned(Learned {
                seq_num: m.seq_num,
                round: m.round,
            }),
            Body::OldRound(m) => PaxosMessage::OldRound(OldRound {
                seq_num: m.seq_num,
                last_round: m.last_round,
                leader: if m.leader.is_empty() {
                    None
                } else {
                    Some(parse_node_id(&m.leader)?)
                },
            }),
            Body::Need(m) => PaxosMessage::Need(Need {
                min_seq: m.min_seq,
                max_seq: m.max_seq,
            }),
            Body::OutOfDate(_) => PaxosMessage::OutOfDate,
            Body::Heartbeat(m) => PaxosMessage::Heartbeat(Heartbeat {
                metadata: Bytes::from(m.metadata),
            }),
        };

        Ok(Packet { source, message })
    }
}
