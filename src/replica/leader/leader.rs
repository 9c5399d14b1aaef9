use crate::actor::{Callback, WeakActorClient};
use crate::failure_detector::{FailureDetector, Membership};
use crate::messages::{Begin, Collect, Learned, NodeId, Packet, PaxosMessage, Proposal, Round, SeqNum};
use crate::replica::timers::ActorTimerHandle;
use crate::replica::{Outcome, PaxosError, TimerTick, VoteOutcome};
use crate::transport::{Destination, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;

/// Everything a leader needs from its replica, shared by all leaders the factory creates.
#[derive(Clone)]
pub(crate) struct LeaderContext {
    pub(crate) logger: slog::Logger,
    pub(crate) local: NodeId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) failure_detector: FailureDetector,
    pub(crate) actor_client: WeakActorClient,
    pub(crate) interaction_timeout: Duration,
    pub(crate) max_tries: u32,
}

/// The state names what the leader does when it next gets to run, so while it waits on Lasts
/// it's in `Begin`, and while it waits on Accepts it's in `Success`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LeaderState {
    Initial,
    Submitted,
    Collect,
    Begin,
    Success,
    Exit,
    Abort,
    Shutdown,
}

/// Leader drives one Paxos instance to an outcome: Collect to win the round (skipped under
/// multi-paxos), Begin to get the value accepted, then Learned to everyone.
pub(crate) struct Leader {
    logger: slog::Logger,
    context: LeaderContext,
    seq_num: SeqNum,
    round: Round,
    start_state: LeaderState,
    state: LeaderState,
    tries: u32,
    proposal: Proposal,
    submitter: Option<Callback<VoteOutcome, PaxosError>>,
    membership: Option<Membership>,
    // One response per member per round, duplicates collapse.
    responses: HashMap<NodeId, PaxosMessage>,
    outcomes: Vec<VoteOutcome>,
    interaction_timer: Option<ActorTimerHandle>,
    timer_generation: u64,
}

impl Leader {
    pub(crate) fn new(context: LeaderContext, seq_num: SeqNum, round: Round, start_state: LeaderState) -> Self {
        Leader {
            logger: context.logger.new(slog::o!("Seq" => seq_num, "Round" => round)),
            context,
            seq_num,
            round,
            start_state,
            state: LeaderState::Initial,
            tries: 0,
            proposal: Proposal::NoValue,
            submitter: None,
            membership: None,
            responses: HashMap::new(),
            outcomes: vec![],
            interaction_timer: None,
            timer_generation: 0,
        }
    }

    pub(crate) fn seq_num(&self) -> SeqNum {
        self.seq_num
    }

    pub(crate) fn round(&self) -> Round {
        self.round
    }

    pub(crate) fn state(&self) -> LeaderState {
        self.state
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(
            self.state,
            LeaderState::Exit | LeaderState::Abort | LeaderState::Shutdown
        )
    }

    /// The final outcome, once done. A leader that drove someone else's value reports the
    /// decision here, while its submitter got OtherValue.
    pub(crate) fn outcome(&self) -> Option<&VoteOutcome> {
        self.outcomes.last()
    }

    pub(crate) fn submit(&mut self, proposal: Proposal, submitter: Option<Callback<VoteOutcome, PaxosError>>) {
        if self.state != LeaderState::Initial {
            slog::error!(self.logger, "Leader already submitted, in {:?}", self.state);
            if let Some(submitter) = submitter {
                submitter.send(Err(PaxosError::Inactive));
            }
            return;
        }

        slog::debug!(self.logger, "Submitted {:?}, starting at {:?}", proposal, self.start_state);
        self.proposal = proposal;
        self.submitter = submitter;
        self.membership = Some(self.context.failure_detector.snapshot());
        self.state = LeaderState::Submitted;

        self.process();
    }

    fn process(&mut self) {
        loop {
            match self.state {
                LeaderState::Initial | LeaderState::Exit | LeaderState::Abort | LeaderState::Shutdown => return,
                LeaderState::Submitted => {
                    self.state = self.start_state;
                }
                LeaderState::Collect => {
                    self.state = LeaderState::Begin;
                    self.emit(PaxosMessage::Collect(Collect {
                        seq_num: self.seq_num,
                        round: self.round,
                        leader: self.context.local,
                    }));
                    return;
                }
                LeaderState::Begin => {
                    self.adopt_accepted_value();
                    self.state = LeaderState::Success;
                    self.emit(PaxosMessage::Begin(Begin {
                        seq_num: self.seq_num,
                        round: self.round,
                        value: self.proposal.clone(),
                    }));
                    return;
                }
                LeaderState::Success => {
                    let round = self.round;
                    let accepts = self
                        .responses
                        .values()
                        .filter(|message| matches!(message, PaxosMessage::Accept(accept) if accept.round == round))
                        .count();

                    if self.membership.as_ref().map_or(false, |m| m.is_majority(accepts)) {
                        self.context.transport.send(
                            PaxosMessage::Learned(Learned {
                                seq_num: self.seq_num,
                                round: self.round,
                            }),
                            Destination::Broadcast,
                        );
                        self.state = LeaderState::Exit;
                        self.report(Outcome::Decision);
                        self.complete();
                        return;
                    }

                    // Not enough Accepts this time round, go again.
                    self.state = LeaderState::Begin;
                }
            }
        }
    }

    // If acceptors already hold a value for this instance, the one from the highest round must
    // be driven instead of ours.
    fn adopt_accepted_value(&mut self) {
        let accepted = self
            .responses
            .values()
            .filter_map(|message| match message {
                PaxosMessage::Last(last) if !last.value.is_no_value() => Some(last),
                _ => None,
            })
            .max_by_key(|last| last.round)
            .map(|last| last.value.clone());

        let accepted = match accepted {
            Some(value) if value != self.proposal => value,
            _ => return,
        };

        slog::info!(self.logger, "Instance already carries {:?}, driving it instead", accepted);
        let ours = std::mem::replace(&mut self.proposal, accepted);
        self.outcomes.push(VoteOutcome::new(
            Outcome::OtherValue,
            self.seq_num,
            self.round,
            ours,
            Some(self.context.local),
        ));
        self.notify_submitter();
    }

    fn emit(&mut self, message: PaxosMessage) {
        self.responses.clear();

        let can_complete = self.membership.as_mut().map_or(false, Membership::start_interaction);
        if !can_complete {
            slog::warn!(self.logger, "Live members are below majority, giving up");
            self.fail(Outcome::BadMembership);
            return;
        }

        self.arm_timer();
        slog::debug!(self.logger, "Broadcasting {:?}", message);
        self.context.transport.send(message, Destination::Broadcast);
    }

    fn arm_timer(&mut self) {
        self.timer_generation += 1;
        self.interaction_timer = Some(ActorTimerHandle::spawn_timer_task(
            self.context.interaction_timeout,
            self.context.actor_client.clone(),
            TimerTick::LeaderInteraction {
                seq_num: self.seq_num,
                generation: self.timer_generation,
            },
        ));
    }

    /// Whether `message` is part of this leader's current exchange.
    pub(crate) fn is_routeable(&self, message: &PaxosMessage) -> bool {
        match message {
            PaxosMessage::Last(last) => last.seq_num == self.seq_num && self.state == LeaderState::Begin,
            PaxosMessage::Accept(accept) => {
                accept.seq_num == self.seq_num && accept.round == self.round && self.state == LeaderState::Success
            }
            PaxosMessage::OldRound(old_round) => old_round.seq_num >= self.seq_num && !self.is_done(),
            _ => false,
        }
    }

    pub(crate) fn message_received(&mut self, packet: &Packet) {
        if self.is_done() {
            return;
        }

        match &packet.message {
            PaxosMessage::OldRound(old_round) => {
                slog::info!(self.logger, "Outbid, {:?} from {}", old_round, packet.source);
                self.state = LeaderState::Abort;
                self.outcomes.push(VoteOutcome::new(
                    Outcome::OtherLeader,
                    old_round.seq_num,
                    old_round.last_round,
                    self.proposal.clone(),
                    old_round.leader,
                ));
                self.complete();
            }
            PaxosMessage::Last(_) | PaxosMessage::Accept(_) => {
                let membership = match &mut self.membership {
                    Some(membership) => membership,
                    None => return,
                };
                if !membership.includes(packet.source) {
                    return;
                }

                self.responses.insert(packet.source, packet.message.clone());
                if membership.received_response(packet.source) {
                    self.interaction_timer = None;
                    self.tries = 0;
                    self.process();
                }
            }
            other => {
                slog::debug!(self.logger, "Leader ignoring {:?}", other);
            }
        }
    }

    pub(crate) fn interaction_timeout(&mut self, generation: u64) {
        if self.is_done() || generation != self.timer_generation {
            return;
        }

        self.interaction_timer = None;
        self.tries += 1;
        if self.tries >= self.context.max_tries {
            slog::warn!(self.logger, "No majority after {} tries", self.tries);
            self.fail(Outcome::VoteTimeout);
            return;
        }

        slog::info!(self.logger, "Interaction timed out in {:?}, retrying", self.state);
        self.state = match self.state {
            LeaderState::Begin => LeaderState::Collect,
            LeaderState::Success => LeaderState::Begin,
            other => other,
        };
        self.process();
    }

    pub(crate) fn member_evicted(&mut self, node: NodeId) {
        if self.is_done() {
            return;
        }

        let lost_majority = self.membership.as_mut().map_or(false, |m| m.member_lost(node));
        if lost_majority {
            slog::warn!(self.logger, "Lost {} and with it a majority", node);
            self.fail(Outcome::BadMembership);
        }
    }

    /// Abandon the instance without an outcome. The submitter hears that the replica is going away.
    pub(crate) fn shutdown(&mut self) {
        if self.is_done() {
            return;
        }

        self.state = LeaderState::Shutdown;
        self.outcomes.clear();
        self.interaction_timer = None;
        if let Some(mut membership) = self.membership.take() {
            membership.dispose();
        }
        if let Some(submitter) = self.submitter.take() {
            submitter.send(Err(PaxosError::Inactive));
        }
        self.state = LeaderState::Abort;
    }

    fn fail(&mut self, outcome: Outcome) {
        self.state = LeaderState::Abort;
        self.report(outcome);
        self.complete();
    }

    fn report(&mut self, outcome: Outcome) {
        self.outcomes.push(VoteOutcome::new(
            outcome,
            self.seq_num,
            self.round,
            self.proposal.clone(),
            Some(self.context.local),
        ));
    }

    fn complete(&mut self) {
        self.interaction_timer = None;
        if let Some(membership) = &mut self.membership {
            membership.dispose();
        }
        self.notify_submitter();
    }

    // The submitter gets the first outcome, later ones only go to the factory.
    fn notify_submitter(&mut self) {
        if let (Some(submitter), Some(first)) = (self.submitter.take(), self.outcomes.first()) {
            submitter.send(Ok(first.clone()));
        }
    }
}
