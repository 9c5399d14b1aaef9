use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// Identifies one Paxos instance (one log slot). Instances start at 0.
pub type SeqNum = i64;

/// A leader's bid number for an instance.
pub type Round = i64;

/// Sequence number used by messages that don't belong to an instance, and by the initial watermark.
pub const UNKNOWN_SEQ: SeqNum = -1;

/// Round reported in a `Last` when the acceptor holds no value for the instance.
pub const NO_ROUND: Round = Round::MIN;

/// NodeId is the transport address of a replica. Ordering on addresses breaks ties between
/// leaders bidding with equal rounds.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(SocketAddr);

impl NodeId {
    pub fn new(addr: SocketAddr) -> Self {
        NodeId(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for NodeId {
    fn from(addr: SocketAddr) -> Self {
        NodeId(addr)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The value being agreed on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Proposal {
    /// Nothing has been proposed yet.
    NoValue,
    /// No-op submitted by a leader to keep its lease alive. Never delivered to listeners.
    Heartbeat,
    Value(Bytes),
}

impl Proposal {
    pub fn is_no_value(&self) -> bool {
        matches!(self, Proposal::NoValue)
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Proposal::Heartbeat)
    }
}

impl From<Bytes> for Proposal {
    fn from(data: Bytes) -> Self {
        Proposal::Value(data)
    }
}

/// A leadership bid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Collect {
    pub seq_num: SeqNum,
    pub round: Round,
    pub leader: NodeId,
}

impl Collect {
    /// Strictly greater round, or the same round from a greater leader address.
    pub fn supersedes(&self, other: &Collect) -> bool {
        (self.round, self.leader) > (other.round, other.leader)
    }

    /// A repeat bid from the leader that `other` belongs to.
    pub fn same_leader(&self, other: &Collect) -> bool {
        self.round >= other.round && self.leader == other.leader
    }
}

/// Acceptor's answer to a `Collect`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Last {
    pub seq_num: SeqNum,
    pub low_watermark: SeqNum,
    pub round: Round,
    pub value: Proposal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Begin {
    pub seq_num: SeqNum,
    pub round: Round,
    pub value: Proposal,
}

impl Begin {
    /// Begin issued under the same round by the same leader as `collect`.
    pub fn originates(&self, source: NodeId, collect: &Collect) -> bool {
        self.round == collect.round && source == collect.leader
    }

    /// Begin whose bid has been overtaken by `collect`.
    pub fn precedes(&self, source: NodeId, collect: &Collect) -> bool {
        (self.round, source) < (collect.round, collect.leader)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Accept {
    pub seq_num: SeqNum,
    pub round: Round,
}

/// Commit notification for an instance, a.k.a. Success.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Learned {
    pub seq_num: SeqNum,
    pub round: Round,
}

/// Rejection of a leader that has been outbid, or that bid for an already committed instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OldRound {
    pub seq_num: SeqNum,
    pub last_round: Round,
    pub leader: Option<NodeId>,
}

/// Request to replay the decided instances `min_seq..=max_seq` to the sender.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Need {
    pub min_seq: SeqNum,
    pub max_seq: SeqNum,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Heartbeat {
    pub metadata: Bytes,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PaxosMessage {
    Collect(Collect),
    Last(Last),
    Begin(Begin),
    Accept(Accept),
    Learned(Learned),
    OldRound(OldRound),
    Need(Need),
    OutOfDate,
    Heartbeat(Heartbeat),
}

/// Which component of a replica consumes a message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Classification {
    AcceptorLearner,
    Leader,
    Recovery,
    FailureDetector,
}

impl PaxosMessage {
    pub fn seq_num(&self) -> SeqNum {
        match self {
            PaxosMessage::Collect(m) => m.seq_num,
            PaxosMessage::Last(m) => m.seq_num,
            PaxosMessage::Begin(m) => m.seq_num,
            PaxosMessage::Accept(m) => m.seq_num,
            PaxosMessage::Learned(m) => m.seq_num,
            PaxosMessage::OldRound(m) => m.seq_num,
            PaxosMessage::Need(_) | PaxosMessage::OutOfDate | PaxosMessage::Heartbeat(_) => UNKNOWN_SEQ,
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            PaxosMessage::Collect(_) | PaxosMessage::Begin(_) | PaxosMessage::Learned(_) => {
                Classification::AcceptorLearner
            }
            PaxosMessage::Last(_) | PaxosMessage::Accept(_) | PaxosMessage::OldRound(_) => Classification::Leader,
            PaxosMessage::Need(_) | PaxosMessage::OutOfDate => Classification::Recovery,
            PaxosMessage::Heartbeat(_) => Classification::FailureDetector,
        }
    }

    pub fn is_collect(&self) -> bool {
        matches!(self, PaxosMessage::Collect(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub source: NodeId,
    pub message: PaxosMessage,
}

impl Packet {
    pub fn new(source: NodeId, message: PaxosMessage) -> Self {
        Packet { source, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> NodeId {
        NodeId::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn collect_supersedes_on_round_then_leader() {
        let low = Collect {
            seq_num: 0,
            round: 1,
            leader: node(2),
        };
        let higher_round = Collect {
            seq_num: 0,
            round: 2,
            leader: node(1),
        };
        let same_round_higher_addr = Collect {
            seq_num: 0,
            round: 1,
            leader: node(3),
        };

        assert!(higher_round.supersedes(&low));
        assert!(!low.supersedes(&higher_round));
        assert!(same_round_higher_addr.supersedes(&low));
        assert!(!low.supersedes(&low.clone()));
        assert!(low.same_leader(&low.clone()));
        assert!(!same_round_higher_addr.same_leader(&low));
    }

    #[test]
    fn begin_originates_and_precedes() {
        let collect = Collect {
            seq_num: 0,
            round: 2,
            leader: node(5),
        };
        let begin = |round| Begin {
            seq_num: 0,
            round,
            value: Proposal::NoValue,
        };

        assert!(begin(2).originates(node(5), &collect));
        assert!(!begin(2).originates(node(4), &collect));
        assert!(begin(1).precedes(node(9), &collect));
        assert!(begin(2).precedes(node(4), &collect));
        assert!(!begin(3).precedes(node(1), &collect));
    }
}
