use crate::failure_detector::detector::SnapshotRegistration;
use crate::messages::NodeId;
use std::collections::HashSet;

pub(crate) enum MemberSet {
    /// Every address counts as a member.
    Open,
    Fixed(HashSet<NodeId>),
}

/// Membership is the set of replicas one leader talks to, captured when the leader starts. It
/// tracks responses for one communication round at a time, and only ever shrinks.
pub(crate) struct Membership {
    members: MemberSet,
    majority: usize,
    outstanding: HashSet<NodeId>,
    responded: HashSet<NodeId>,
    all_received: bool,
    registration: Option<SnapshotRegistration>,
}

impl Membership {
    pub(super) fn new(members: MemberSet, majority: usize, registration: SnapshotRegistration) -> Self {
        Membership {
            members,
            majority,
            outstanding: HashSet::new(),
            responded: HashSet::new(),
            all_received: false,
            registration: Some(registration),
        }
    }

    /// Begin a communication round. Returns false if the round can't possibly reach a majority,
    /// in which case the leader must abort.
    pub(crate) fn start_interaction(&mut self) -> bool {
        self.responded.clear();
        self.all_received = false;
        self.outstanding = match &self.members {
            MemberSet::Open => HashSet::new(),
            MemberSet::Fixed(members) => members.clone(),
        };

        self.could_complete()
    }

    /// Record a response. Returns true exactly once per round: when everyone outstanding has
    /// answered, or a majority has.
    pub(crate) fn received_response(&mut self, from: NodeId) -> bool {
        if self.all_received || !self.includes(from) || !self.responded.insert(from) {
            return false;
        }
        self.outstanding.remove(&from);

        let complete = match self.members {
            MemberSet::Fixed(_) if self.outstanding.is_empty() => true,
            _ => self.responded.len() >= self.majority,
        };
        if complete {
            self.all_received = true;
        }

        complete
    }

    /// Drop a member that has been declared dead. Returns true if the round can no longer reach
    /// a majority, in which case the leader must abort.
    pub(crate) fn member_lost(&mut self, node: NodeId) -> bool {
        if let MemberSet::Fixed(members) = &mut self.members {
            members.remove(&node);
            self.outstanding.remove(&node);
        }

        !self.could_complete()
    }

    pub(crate) fn could_complete(&self) -> bool {
        match &self.members {
            MemberSet::Open => true,
            MemberSet::Fixed(members) => members.len() >= self.majority,
        }
    }

    pub(crate) fn is_majority(&self, count: usize) -> bool {
        count >= self.majority
    }

    pub(crate) fn includes(&self, node: NodeId) -> bool {
        match &self.members {
            MemberSet::Open => true,
            MemberSet::Fixed(members) => members.contains(&node),
        }
    }

    /// Release this snapshot's registration with the failure detector. Idempotent.
    pub(crate) fn dispose(&mut self) {
        self.registration.take();
    }
}

#[cfg(test)]
mod tests {
    use crate::failure_detector::FailureDetector;
    use crate::messages::NodeId;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use tokio::time::{Duration, Instant};

    fn node(port: u16) -> NodeId {
        NodeId::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn detector_with_members(cluster_size: usize, live: u16) -> FailureDetector {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let fd = FailureDetector::new(logger, cluster_size, Duration::from_secs(5)).unwrap();
        for port in 1..=live {
            fd.process_heartbeat(node(port), Bytes::new(), Instant::now());
        }
        fd
    }

    #[test]
    fn majority_of_responses_completes_round_once() {
        let fd = detector_with_members(5, 5);
        let mut membership = fd.snapshot();

        assert!(membership.start_interaction());
        assert!(!membership.received_response(node(1)));
        assert!(!membership.received_response(node(1)));
        assert!(!membership.received_response(node(9)));
        assert!(!membership.received_response(node(2)));
        assert!(membership.received_response(node(3)));
        assert!(!membership.received_response(node(4)));

        // Next round starts from scratch.
        assert!(membership.start_interaction());
        assert!(!membership.received_response(node(4)));
    }

    #[test]
    fn sub_majority_snapshot_cannot_start() {
        let fd = detector_with_members(5, 2);
        let mut membership = fd.snapshot();

        assert!(!membership.start_interaction());
    }

    #[test]
    fn shrinking_below_majority_aborts() {
        let fd = detector_with_members(3, 3);
        let mut membership = fd.snapshot();
        assert!(membership.start_interaction());

        assert!(!membership.member_lost(node(1)));
        assert!(membership.member_lost(node(2)));
        assert!(!membership.received_response(node(1)));
    }

    #[test]
    fn open_membership_counts_anyone() {
        let fd = detector_with_members(3, 0);
        fd.pin_open();
        let mut membership = fd.snapshot();

        assert!(membership.start_interaction());
        assert!(!membership.member_lost(node(7)));
        assert!(!membership.received_response(node(7)));
        assert!(membership.received_response(node(8)));
    }

    #[test]
    fn dispose_is_idempotent() {
        let fd = detector_with_members(3, 3);
        let mut membership = fd.snapshot();

        membership.dispose();
        membership.dispose();
        assert_eq!(fd.live_snapshot_count(), 0);
        drop(membership);
        assert_eq!(fd.live_snapshot_count(), 0);
    }
}
