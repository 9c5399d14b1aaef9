use crate::actor::Callback;
use crate::messages::{NodeId, Packet, Proposal, Round, SeqNum};
use crate::replica::leader::leader::{Leader, LeaderContext, LeaderState};
use crate::replica::timers::ActorTimerHandle;
use crate::replica::{Outcome, PaxosError, TimerTick, VoteOutcome};
use std::collections::{BTreeMap, VecDeque};
use tokio::time::Duration;

/// What the factory needs to know about the local acceptor/learner when sizing up the next
/// leader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct AcceptorView {
    pub(crate) watermark: SeqNum,
    pub(crate) last_round: Round,
    pub(crate) out_of_date: bool,
}

/// LeaderFactory runs the leaders of one replica, one instance at a time, in submission order.
/// It picks each new leader's sequence number and round from how the previous one ended, so
/// that a leader in good standing skips straight to Begin. While it stays leader and idle, it
/// keeps the lease alive with heartbeats.
pub(crate) struct LeaderFactory {
    logger: slog::Logger,
    context: LeaderContext,
    leader_lease: Duration,
    leaders: BTreeMap<SeqNum, Leader>,
    pending: VecDeque<(Proposal, Callback<VoteOutcome, PaxosError>)>,
    heartbeat_timer: Option<ActorTimerHandle>,
    heartbeat_generation: u64,
    shut_down: bool,
}

impl LeaderFactory {
    pub(crate) fn new(context: LeaderContext, leader_lease: Duration) -> Self {
        LeaderFactory {
            logger: context.logger.new(slog::o!("Component" => "LeaderFactory")),
            context,
            leader_lease,
            leaders: BTreeMap::new(),
            pending: VecDeque::new(),
            heartbeat_timer: None,
            heartbeat_generation: 0,
            shut_down: false,
        }
    }

    pub(crate) fn submit(
        &mut self,
        proposal: Proposal,
        callback: Callback<VoteOutcome, PaxosError>,
        acceptor: AcceptorView,
    ) {
        if self.shut_down || acceptor.out_of_date {
            callback.send(Err(PaxosError::Inactive));
            return;
        }

        self.pending.push_back((proposal, callback));
        self.after_progress(acceptor);
    }

    pub(crate) fn message_received(&mut self, packet: &Packet, acceptor: AcceptorView) {
        for leader in self.leaders.values_mut() {
            if leader.is_routeable(&packet.message) {
                leader.message_received(packet);
            }
        }

        self.after_progress(acceptor);
    }

    pub(crate) fn interaction_timeout(&mut self, seq_num: SeqNum, generation: u64, acceptor: AcceptorView) {
        if let Some(leader) = self.leaders.get_mut(&seq_num) {
            leader.interaction_timeout(generation);
        }

        self.after_progress(acceptor);
    }

    pub(crate) fn member_evicted(&mut self, node: NodeId, acceptor: AcceptorView) {
        for leader in self.leaders.values_mut() {
            leader.member_evicted(node);
        }

        self.after_progress(acceptor);
    }

    pub(crate) fn heartbeat_tick(&mut self, generation: u64, acceptor: AcceptorView) {
        if generation != self.heartbeat_generation || self.heartbeat_timer.take().is_none() {
            return;
        }
        if self.shut_down || acceptor.out_of_date || self.is_active() || !self.pending.is_empty() {
            return;
        }

        slog::debug!(self.logger, "Idle, sending heartbeat");
        let mut leader = self.new_leader(acceptor);
        leader.submit(Proposal::Heartbeat, None);
        self.leaders.insert(leader.seq_num(), leader);

        self.after_progress(acceptor);
    }

    /// The local acceptor/learner fell out of date. Nothing can be led until it's brought back.
    pub(crate) fn acceptor_out_of_date(&mut self) {
        self.kill_heartbeats();
        for (_, callback) in self.pending.drain(..) {
            callback.send(Err(PaxosError::Inactive));
        }
    }

    pub(crate) fn shutdown(&mut self) {
        self.shut_down = true;
        self.kill_heartbeats();

        for leader in self.leaders.values_mut() {
            leader.shutdown();
        }
        self.leaders.clear();
        for (_, callback) in self.pending.drain(..) {
            callback.send(Err(PaxosError::Inactive));
        }
    }

    pub(crate) fn active_leader(&self) -> Option<SeqNum> {
        self.leaders
            .values()
            .next_back()
            .filter(|leader| !leader.is_done())
            .map(Leader::seq_num)
    }

    fn is_active(&self) -> bool {
        self.active_leader().is_some()
    }

    // Start queued submissions while the way is clear, then decide whether to heartbeat.
    fn after_progress(&mut self, acceptor: AcceptorView) {
        loop {
            self.dispose();
            if self.is_active() {
                return;
            }

            let (proposal, callback) = match self.pending.pop_front() {
                Some(submission) => submission,
                None => break,
            };
            if self.shut_down || acceptor.out_of_date {
                callback.send(Err(PaxosError::Inactive));
                continue;
            }

            self.kill_heartbeats();
            let mut leader = self.new_leader(acceptor);
            leader.submit(proposal, Some(callback));
            self.leaders.insert(leader.seq_num(), leader);
        }

        let still_leading = self
            .leaders
            .values()
            .next_back()
            .and_then(Leader::outcome)
            .map_or(false, |outcome| {
                matches!(outcome.outcome, Outcome::Decision | Outcome::OtherValue)
            });
        if still_leading && !self.shut_down && !acceptor.out_of_date {
            self.arm_heartbeat();
        }
    }

    // Only the most recent finished leader is kept, its outcome seeds the next one.
    fn dispose(&mut self) {
        let newest = match self.leaders.keys().next_back() {
            Some(seq_num) => *seq_num,
            None => return,
        };
        self.leaders
            .retain(|seq_num, leader| *seq_num == newest || !leader.is_done());
    }

    fn new_leader(&self, acceptor: AcceptorView) -> Leader {
        let mut seq_num = acceptor.watermark + 1;
        let mut round = acceptor.last_round.max(0) + 1;
        let mut start_state = LeaderState::Collect;

        if let Some(previous) = self.leaders.values().next_back() {
            match previous.outcome() {
                Some(outcome) => match outcome.outcome {
                    // Still leader as far as we know, carry on without a Collect.
                    Outcome::Decision | Outcome::OtherValue if seq_num <= outcome.seq_num + 1 => {
                        start_state = LeaderState::Begin;
                        seq_num = outcome.seq_num + 1;
                        round = outcome.round;
                    }
                    Outcome::OtherLeader if seq_num <= outcome.seq_num + 1 => {
                        seq_num = outcome.seq_num + 1;
                        round = outcome.round.max(acceptor.last_round).max(0) + 1;
                    }
                    _ => {}
                },
                None => {
                    seq_num = previous.seq_num() + 1;
                    round = previous.round();
                }
            }
        }

        slog::debug!(self.logger, "New leader for {} in round {}, at {:?}", seq_num, round, start_state);
        Leader::new(self.context.clone(), seq_num, round, start_state)
    }

    fn arm_heartbeat(&mut self) {
        if self.heartbeat_timer.is_some() {
            return;
        }

        self.heartbeat_generation += 1;
        let refresh = self.leader_lease - self.leader_lease / 10;
        self.heartbeat_timer = Some(ActorTimerHandle::spawn_timer_task(
            refresh,
            self.context.actor_client.clone(),
            TimerTick::LeaseHeartbeat {
                generation: self.heartbeat_generation,
            },
        ));
    }

    fn kill_heartbeats(&mut self) {
        self.heartbeat_timer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::failure_detector::FailureDetector;
    use crate::messages::{Accept, Begin, Collect, Last, OldRound, PaxosMessage, NO_ROUND};
    use crate::transport::{Destination, RecordingTransport};
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::{mpsc, oneshot};

    fn node(port: u16) -> NodeId {
        NodeId::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn value(s: &'static str) -> Proposal {
        Proposal::Value(Bytes::from(s))
    }

    fn fresh() -> AcceptorView {
        AcceptorView {
            watermark: -1,
            last_round: NO_ROUND,
            out_of_date: false,
        }
    }

    type Reply = oneshot::Receiver<Result<VoteOutcome, PaxosError>>;

    struct Harness {
        factory: LeaderFactory,
        transport: RecordingTransport,
        _actor_client: ActorClient,
        actor_rx: mpsc::Receiver<Event>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_lease(Duration::from_secs(30))
        }

        fn with_lease(lease: Duration) -> Self {
            let logger = slog::Logger::root(slog::Discard, slog::o!());
            let transport = RecordingTransport::new(node(1));
            let failure_detector = FailureDetector::new(logger.clone(), 3, Duration::from_secs(5)).unwrap();
            failure_detector.pin_open();
            let (actor_client, actor_rx) = ActorClient::new(10);

            let context = LeaderContext {
                logger,
                local: node(1),
                transport: Arc::new(transport.clone()),
                failure_detector,
                actor_client: actor_client.weak(),
                interaction_timeout: Duration::from_secs(30),
                max_tries: 3,
            };

            Harness {
                factory: LeaderFactory::new(context, lease),
                transport,
                _actor_client: actor_client,
                actor_rx,
            }
        }

        fn submit(&mut self, proposal: Proposal, acceptor: AcceptorView) -> Reply {
            let (callback, rx) = Callback::channel();
            self.factory.submit(proposal, callback, acceptor);
            rx
        }

        fn respond(&mut self, message: PaxosMessage, acceptor: AcceptorView) {
            for from in [1, 2].iter() {
                self.factory
                    .message_received(&Packet::new(node(*from), message.clone()), acceptor);
            }
        }

        fn broadcasts(&self) -> Vec<PaxosMessage> {
            self.transport
                .take_sent()
                .into_iter()
                .filter(|(_, destination)| *destination == Destination::Broadcast)
                .map(|(message, _)| message)
                .collect()
        }

        /// Answers the in-flight Collect with empty Lasts.
        fn grant_collect(&mut self, seq_num: SeqNum, acceptor: AcceptorView) {
            self.respond(
                PaxosMessage::Last(Last {
                    seq_num,
                    low_watermark: seq_num - 1,
                    round: NO_ROUND,
                    value: Proposal::NoValue,
                }),
                acceptor,
            );
        }

        fn accept(&mut self, seq_num: SeqNum, round: Round, acceptor: AcceptorView) {
            self.respond(PaxosMessage::Accept(Accept { seq_num, round }), acceptor);
        }
    }

    #[tokio::test]
    async fn decision_lets_next_leader_skip_collect() {
        // -- setup --
        let mut h = Harness::new();
        let mut first = h.submit(value("a"), fresh());
        assert_eq!(
            h.broadcasts(),
            vec![PaxosMessage::Collect(Collect {
                seq_num: 0,
                round: 1,
                leader: node(1),
            })]
        );
        h.grant_collect(0, fresh());
        h.accept(0, 1, fresh());
        assert_eq!(first.try_recv().unwrap().unwrap().outcome, Outcome::Decision);
        h.broadcasts();

        // -- execute --
        let _second = h.submit(value("b"), fresh());

        // -- verify --
        assert_eq!(
            h.broadcasts(),
            vec![PaxosMessage::Begin(Begin {
                seq_num: 1,
                round: 1,
                value: value("b"),
            })]
        );
        assert_eq!(h.factory.active_leader(), Some(1));
    }

    #[tokio::test]
    async fn acceptor_ahead_forces_collect_at_its_watermark() {
        // -- setup --
        let mut h = Harness::new();
        let _ = h.submit(value("a"), fresh());
        h.grant_collect(0, fresh());
        h.accept(0, 1, fresh());
        h.broadcasts();
        let ahead = AcceptorView {
            watermark: 9,
            last_round: 4,
            out_of_date: false,
        };

        // -- execute --
        let _ = h.submit(value("b"), ahead);

        // -- verify --
        assert_eq!(
            h.broadcasts(),
            vec![PaxosMessage::Collect(Collect {
                seq_num: 10,
                round: 5,
                leader: node(1),
            })]
        );
    }

    #[tokio::test]
    async fn other_leader_moves_to_next_seq_and_round() {
        // -- setup --
        let mut h = Harness::new();
        let mut first = h.submit(value("a"), fresh());
        h.factory.message_received(
            &Packet::new(
                node(2),
                PaxosMessage::OldRound(OldRound {
                    seq_num: 3,
                    last_round: 6,
                    leader: Some(node(3)),
                }),
            ),
            fresh(),
        );
        assert_eq!(first.try_recv().unwrap().unwrap().outcome, Outcome::OtherLeader);
        h.broadcasts();

        // -- execute --
        let _ = h.submit(value("b"), fresh());

        // -- verify --
        assert_eq!(
            h.broadcasts(),
            vec![PaxosMessage::Collect(Collect {
                seq_num: 4,
                round: 7,
                leader: node(1),
            })]
        );
    }

    #[tokio::test]
    async fn submissions_queue_behind_active_leader() {
        // -- setup --
        let mut h = Harness::new();
        let mut first = h.submit(value("a"), fresh());
        let mut second = h.submit(value("b"), fresh());
        assert_eq!(h.broadcasts().len(), 1);

        // -- execute --
        h.grant_collect(0, fresh());
        h.accept(0, 1, fresh());

        // -- verify --
        assert_eq!(first.try_recv().unwrap().unwrap().seq_num, 0);
        assert!(second.try_recv().is_err());
        let broadcasts = h.broadcasts();
        assert_eq!(
            broadcasts.last(),
            Some(&PaxosMessage::Begin(Begin {
                seq_num: 1,
                round: 1,
                value: value("b"),
            }))
        );

        h.accept(1, 1, fresh());
        assert_eq!(second.try_recv().unwrap().unwrap().seq_num, 1);
        assert_eq!(h.factory.leaders.len(), 1);
    }

    #[tokio::test]
    async fn idle_leader_heartbeats() {
        // -- setup --
        let mut h = Harness::with_lease(Duration::from_millis(20));
        let _ = h.submit(value("a"), fresh());
        h.grant_collect(0, fresh());
        h.accept(0, 1, fresh());
        h.broadcasts();

        // -- execute --
        let event = tokio::time::timeout(Duration::from_secs(5), h.actor_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let generation = match event {
            Event::Timer(TimerTick::LeaseHeartbeat { generation }) => generation,
            other => panic!("Unexpected event {:?}", other),
        };
        h.factory.heartbeat_tick(generation, fresh());

        // -- verify --
        assert_eq!(
            h.broadcasts(),
            vec![PaxosMessage::Begin(Begin {
                seq_num: 1,
                round: 1,
                value: Proposal::Heartbeat,
            })]
        );
    }

    #[tokio::test]
    async fn out_of_date_acceptor_refuses_submissions() {
        // -- setup --
        let mut h = Harness::new();
        let stale = AcceptorView {
            out_of_date: true,
            ..fresh()
        };

        // -- execute --
        let mut reply = h.submit(value("a"), stale);

        // -- verify --
        assert!(matches!(reply.try_recv().unwrap(), Err(PaxosError::Inactive)));
        assert!(h.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_active_and_queued() {
        // -- setup --
        let mut h = Harness::new();
        let mut active = h.submit(value("a"), fresh());
        let mut queued = h.submit(value("b"), fresh());

        // -- execute --
        h.factory.shutdown();

        // -- verify --
        assert!(matches!(active.try_recv().unwrap(), Err(PaxosError::Inactive)));
        assert!(matches!(queued.try_recv().unwrap(), Err(PaxosError::Inactive)));
        assert!(matches!(
            h.submit(value("c"), fresh()).try_recv().unwrap(),
            Err(PaxosError::Inactive)
        ));
        assert_eq!(h.factory.active_leader(), None);
    }
}
