use crate::actor::WeakActorClient;
use crate::api::OutcomePublisher;
use crate::commitlog::{LogStorage, Offset};
use crate::failure_detector::FailureDetector;
use crate::messages::{
    decode_packet, encode_packet, Accept, Begin, Classification, Collect, Last, Learned, Need, NodeId, OldRound, Packet,
    PaxosMessage, Proposal, Round, SeqNum, NO_ROUND,
};
use crate::replica::acceptor::checkpoint::CheckpointHandle;
use crate::replica::acceptor::recovery::{Recovery, RecoveryWindow};
use crate::replica::acceptor::{streamer, Watermark};
use crate::replica::timers::ActorTimerHandle;
use crate::replica::{AcceptorState, Outcome, StorageFault, TimerTick, VoteOutcome};
use crate::transport::{Destination, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub(crate) struct AcceptorLearnerConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) storage: Arc<dyn LogStorage>,
    pub(crate) failure_detector: FailureDetector,
    pub(crate) outcome_publisher: OutcomePublisher,
    pub(crate) actor_client: WeakActorClient,
    pub(crate) leader_lease: Duration,
    pub(crate) recovery_grace_period: Duration,
}

/// AcceptorLearner is the acceptor and learner roles of one replica. It answers leaders, keeps
/// the durable log, tracks the watermark of contiguous decisions, and fills gaps in its history
/// by asking peers to stream their log.
///
/// Every state change is written to the log before it becomes visible to anyone else.
pub(crate) struct AcceptorLearner {
    logger: slog::Logger,
    local: NodeId,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn LogStorage>,
    failure_detector: FailureDetector,
    outcome_publisher: OutcomePublisher,
    actor_client: WeakActorClient,
    leader_lease: Duration,
    recovery_grace_period: Duration,

    watermark: Watermark,
    last_collect: Option<Collect>,
    // Accepted Begins for instances above the watermark.
    cached_begins: HashMap<SeqNum, Begin>,
    last_leader_action: Option<Instant>,
    recovery: Option<Recovery>,
    out_of_date: bool,
    // Instances at or below this may have been discarded from the log.
    log_floor: SeqNum,
    watchdog_generation: u64,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    ignored_collects: u64,
    received_heartbeats: u64,
}

impl AcceptorLearner {
    pub(crate) fn new(config: AcceptorLearnerConfig) -> Self {
        AcceptorLearner {
            logger: config.logger.new(slog::o!("Component" => "AcceptorLearner")),
            local: config.transport.local_address(),
            transport: config.transport,
            storage: config.storage,
            failure_detector: config.failure_detector,
            outcome_publisher: config.outcome_publisher,
            actor_client: config.actor_client,
            leader_lease: config.leader_lease,
            recovery_grace_period: config.recovery_grace_period,
            watermark: Watermark::initial(),
            last_collect: None,
            cached_begins: HashMap::new(),
            last_leader_action: None,
            recovery: None,
            out_of_date: false,
            log_floor: Watermark::initial().seq_num,
            watchdog_generation: 0,
            stats: Stats::default(),
        }
    }

    /// Restore state from `handle`, then replay the log written since it. Decisions replayed
    /// beyond the checkpoint are signalled again. The handle must come from this log, a peer's
    /// handle is adopted with `bring_up_to_date()`.
    pub(crate) fn open(&mut self, handle: &CheckpointHandle) -> Result<(), StorageFault> {
        self.storage.open().map_err(StorageFault::Open)?;

        self.watermark = handle.watermark();
        self.last_collect = handle.last_collect().cloned();
        self.log_floor = self.watermark.seq_num;
        self.cached_begins.clear();
        self.recovery = None;
        self.out_of_date = false;

        let from = self.watermark.log_offset.unwrap_or_else(Offset::start);
        let mut records = vec![];
        self.storage
            .replay(from, &mut |offset, record| records.push((offset, record)))
            .map_err(StorageFault::Replay)?;

        for (offset, record) in records {
            let packet = decode_packet(&record).map_err(|e| StorageFault::Corrupt(offset, e))?;
            self.restore(offset, packet);
        }

        slog::info!(
            self.logger,
            "Opened at watermark {} with last collect {:?}",
            self.watermark.seq_num,
            self.last_collect
        );
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.recovery = None;
        self.outcome_publisher.close();
        if let Err(e) = self.storage.close() {
            slog::warn!(self.logger, "Failed to close log: {}", e);
        }
    }

    fn restore(&mut self, offset: Offset, packet: Packet) {
        match &packet.message {
            PaxosMessage::Collect(collect) => {
                if self.supersedes_last(collect) {
                    self.last_collect = Some(collect.clone());
                }
            }
            PaxosMessage::Begin(begin) if begin.seq_num > self.watermark.seq_num => {
                self.cached_begins.insert(begin.seq_num, begin.clone());
            }
            PaxosMessage::Learned(learned) => {
                if learned.seq_num > self.watermark.seq_num && self.has_matching_begin(learned) {
                    self.advance(packet.source, learned, offset);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn process_message(&mut self, packet: Packet) -> Result<(), StorageFault> {
        // Draining recovery feeds buffered packets back through here. A worklist keeps that
        // iterative however much was buffered.
        let mut worklist = VecDeque::new();
        worklist.push_back(packet);

        while let Some(packet) = worklist.pop_front() {
            self.dispatch(packet, &mut worklist)?;
        }

        Ok(())
    }

    fn dispatch(&mut self, packet: Packet, worklist: &mut VecDeque<Packet>) -> Result<(), StorageFault> {
        if self.out_of_date {
            slog::debug!(self.logger, "Out of date, ignoring {:?}", packet.message);
            return Ok(());
        }

        if self.recovery.is_some() {
            match packet.message {
                PaxosMessage::Need(_) => return Ok(()),
                PaxosMessage::OutOfDate => {
                    self.become_out_of_date(packet.source);
                    return Ok(());
                }
                _ => return self.dispatch_recovering(packet, worklist),
            }
        }

        let seq_num = packet.message.seq_num();
        let is_instance_traffic = packet.message.classification() == Classification::AcceptorLearner;
        if is_instance_traffic && seq_num > self.watermark.seq_num + 1 {
            if packet.message.is_collect() {
                self.start_recovery(packet);
            } else {
                slog::debug!(self.logger, "Dropping {:?} beyond watermark {}", packet.message, self.watermark.seq_num);
            }
            return Ok(());
        }

        self.process(packet, false)
    }

    fn dispatch_recovering(&mut self, packet: Packet, worklist: &mut VecDeque<Packet>) -> Result<(), StorageFault> {
        let seq_num = packet.message.seq_num();
        let window = match &mut self.recovery {
            Some(recovery) if seq_num > recovery.window.max_seq => {
                recovery.buffer(packet);
                return Ok(());
            }
            Some(recovery) => recovery.window,
            None => return Ok(()),
        };
        if !window.covers(seq_num) {
            return Ok(());
        }

        self.process(packet, true)?;
        if self.watermark.seq_num >= window.max_seq {
            self.finish_recovery(worklist);
        }

        Ok(())
    }

    // `replaying` is set for history streamed in by recovery: Begins and Learneds are already
    // decided, so they're applied without a matching Collect. Collects always face the lease,
    // a live rival inside the window must not unseat the leader holding it.
    fn process(&mut self, packet: Packet, replaying: bool) -> Result<(), StorageFault> {
        match &packet.message {
            PaxosMessage::Collect(collect) => self.handle_collect(&packet, collect),
            PaxosMessage::Begin(begin) => self.handle_begin(&packet, begin, replaying),
            PaxosMessage::Learned(learned) => self.handle_learned(&packet, learned, replaying),
            PaxosMessage::Need(need) => {
                self.handle_need(packet.source, need);
                Ok(())
            }
            other => {
                slog::debug!(self.logger, "Ignoring {:?} from {}", other, packet.source);
                Ok(())
            }
        }
    }

    fn handle_collect(&mut self, packet: &Packet, collect: &Collect) -> Result<(), StorageFault> {
        if !self.accepts_leader(collect) {
            self.stats.ignored_collects += 1;
            slog::debug!(self.logger, "Lease held, ignoring {:?} from {}", collect, packet.source);
            return Ok(());
        }

        if collect.seq_num <= self.watermark.seq_num {
            self.reject(packet.source, self.watermark.seq_num);
            return Ok(());
        }

        if self.supersedes_last(collect) {
            self.write(packet, true)?;
            self.last_collect = Some(collect.clone());
            self.send_last(packet.source, collect.seq_num);
        } else if self.last_collect.as_ref().map_or(false, |last| collect.same_leader(last)) {
            self.send_last(packet.source, collect.seq_num);
        } else {
            self.reject(packet.source, collect.seq_num);
        }

        Ok(())
    }

    fn handle_begin(&mut self, packet: &Packet, begin: &Begin, replaying: bool) -> Result<(), StorageFault> {
        if begin.seq_num <= self.watermark.seq_num {
            self.reject(packet.source, self.watermark.seq_num);
            return Ok(());
        }

        let originates = self
            .last_collect
            .as_ref()
            .map_or(false, |last| begin.originates(packet.source, last));

        if originates || replaying {
            if !replaying {
                self.last_leader_action = Some(Instant::now());
            }
            self.write(packet, true)?;
            self.cached_begins.insert(begin.seq_num, begin.clone());
            self.send(
                PaxosMessage::Accept(Accept {
                    seq_num: begin.seq_num,
                    round: begin.round,
                }),
                packet.source,
            );
        } else if self
            .last_collect
            .as_ref()
            .map_or(false, |last| begin.precedes(packet.source, last))
        {
            self.reject(packet.source, begin.seq_num);
        } else {
            slog::debug!(self.logger, "Not answering {:?} from {}", begin, packet.source);
        }

        Ok(())
    }

    fn handle_learned(&mut self, packet: &Packet, learned: &Learned, replaying: bool) -> Result<(), StorageFault> {
        if !replaying {
            self.last_leader_action = Some(Instant::now());
        }

        if learned.seq_num <= self.watermark.seq_num {
            slog::debug!(self.logger, "Already learned {:?}", learned);
            return Ok(());
        }
        if !self.has_matching_begin(learned) {
            slog::debug!(self.logger, "No accepted Begin for {:?}, discarding", learned);
            return Ok(());
        }

        let offset = self.write(packet, true)?;
        self.advance(packet.source, learned, offset);

        Ok(())
    }

    fn handle_need(&mut self, requester: NodeId, need: &Need) {
        if need.max_seq > self.watermark.seq_num {
            slog::debug!(self.logger, "Can't cover {:?} from {}", need, requester);
            return;
        }

        if need.min_seq <= self.log_floor {
            slog::info!(
                self.logger,
                "{:?} from {} reaches below checkpoint {}, it's out of date",
                need,
                requester,
                self.log_floor
            );
            self.send(PaxosMessage::OutOfDate, requester);
            return;
        }

        streamer::spawn_remote_streamer(
            self.logger.clone(),
            self.storage.clone(),
            self.transport.clone(),
            requester,
            need.clone(),
        );
    }

    // Moves the watermark if `learned` is the next instance. Callers have checked the matching
    // Begin is cached.
    fn advance(&mut self, source: NodeId, learned: &Learned, offset: Offset) {
        if learned.seq_num != self.watermark.seq_num + 1 {
            slog::warn!(
                self.logger,
                "{:?} isn't contiguous with watermark {}",
                learned,
                self.watermark.seq_num
            );
            return;
        }

        let begin = match self.cached_begins.remove(&learned.seq_num) {
            Some(begin) => begin,
            None => return,
        };
        self.watermark = Watermark::new(learned.seq_num, offset);

        if begin.value.is_heartbeat() {
            self.stats.received_heartbeats += 1;
            return;
        }
        self.signal(VoteOutcome::new(
            Outcome::Decision,
            learned.seq_num,
            learned.round,
            begin.value,
            Some(source),
        ));
    }

    fn start_recovery(&mut self, packet: Packet) {
        let window = RecoveryWindow::new(self.watermark.seq_num, packet.message.seq_num() - 1);
        let peer = self.failure_detector.random_member(self.local).unwrap_or(packet.source);

        slog::info!(
            self.logger,
            "Missing instances ({}, {}], recovering from {}",
            window.min_seq,
            window.max_seq,
            peer
        );
        self.transport.send(
            PaxosMessage::Need(Need {
                min_seq: window.min_seq + 1,
                max_seq: window.max_seq,
            }),
            Destination::Node(peer),
        );

        let mut recovery = Recovery::new(window, self.watermark.seq_num);
        recovery.buffer(packet);
        self.recovery = Some(recovery);
        self.arm_watchdog();
    }

    fn arm_watchdog(&mut self) {
        self.watchdog_generation += 1;
        let generation = self.watchdog_generation;
        let watchdog = ActorTimerHandle::spawn_timer_task(
            self.recovery_grace_period,
            self.actor_client.clone(),
            TimerTick::RecoveryWatchdog { generation },
        );

        if let Some(recovery) = &mut self.recovery {
            recovery.arm_watchdog(generation, watchdog);
        }
    }

    /// Give up on a recovery that made no progress for a whole grace period. The next Collect
    /// beyond the watermark starts a fresh one.
    pub(crate) fn recovery_watchdog(&mut self, generation: u64) {
        let progressed = match &mut self.recovery {
            Some(recovery) if recovery.generation == generation => {
                let progressed = recovery.checked_watermark != self.watermark.seq_num;
                recovery.checked_watermark = self.watermark.seq_num;
                progressed
            }
            _ => return,
        };

        if progressed {
            self.arm_watchdog();
        } else {
            slog::warn!(self.logger, "Recovery stalled at watermark {}, abandoning", self.watermark.seq_num);
            self.recovery = None;
        }
    }

    fn finish_recovery(&mut self, worklist: &mut VecDeque<Packet>) {
        if let Some(recovery) = self.recovery.take() {
            slog::info!(
                self.logger,
                "Recovered ({}, {}]",
                recovery.window.min_seq,
                recovery.window.max_seq
            );
            for packet in recovery.into_buffered().into_iter().rev() {
                worklist.push_front(packet);
            }
        }
    }

    fn become_out_of_date(&mut self, source: NodeId) {
        slog::warn!(
            self.logger,
            "{} can no longer supply instances after {}, out of date",
            source,
            self.watermark.seq_num
        );
        self.recovery = None;
        self.out_of_date = true;
        self.signal(VoteOutcome::new(
            Outcome::OutOfDate,
            self.watermark.seq_num,
            self.last_round(),
            Proposal::NoValue,
            Some(source),
        ));
    }

    pub(crate) fn new_checkpoint(&self) -> CheckpointHandle {
        CheckpointHandle::new(self.watermark, self.last_collect.clone(), self.actor_client.clone())
    }

    /// The application stored `handle` durably, so the log before its watermark can go.
    pub(crate) fn checkpoint_saved(&mut self, handle: &CheckpointHandle) -> Result<(), StorageFault> {
        let watermark = handle.watermark();
        let offset = match watermark.log_offset {
            Some(offset) if watermark.seq_num > self.log_floor => offset,
            _ => return Ok(()),
        };

        self.storage
            .mark(offset, true)
            .map_err(|e| StorageFault::Mark(offset, e))?;
        self.log_floor = watermark.seq_num;
        slog::info!(self.logger, "Checkpointed at {}", watermark.seq_num);

        Ok(())
    }

    /// Adopt a checkpoint taken by another replica. Refused if it's behind this replica.
    pub(crate) fn bring_up_to_date(&mut self, handle: &CheckpointHandle) -> bool {
        let theirs = handle.watermark();
        if theirs.seq_num < self.watermark.seq_num {
            slog::info!(
                self.logger,
                "Checkpoint at {} is behind watermark {}, refusing",
                theirs.seq_num,
                self.watermark.seq_num
            );
            return false;
        }

        // Offsets in another replica's handle mean nothing in our log.
        self.watermark = Watermark::without_offset(theirs.seq_num);
        if let Some(collect) = handle.last_collect() {
            if self.supersedes_last(collect) {
                self.last_collect = Some(collect.clone());
            }
        }
        let watermark = self.watermark.seq_num;
        self.cached_begins.retain(|seq_num, _| *seq_num > watermark);
        self.log_floor = watermark;
        self.recovery = None;
        self.out_of_date = false;

        slog::info!(self.logger, "Brought up to date at {}", watermark);
        self.signal(VoteOutcome::new(
            Outcome::UpToDate,
            watermark,
            self.last_round(),
            Proposal::NoValue,
            None,
        ));
        true
    }

    pub(crate) fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub(crate) fn last_collect(&self) -> Option<&Collect> {
        self.last_collect.as_ref()
    }

    pub(crate) fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    pub(crate) fn state(&self) -> AcceptorState {
        if self.out_of_date {
            AcceptorState::OutOfDate
        } else if self.recovery.is_some() {
            AcceptorState::Recovering
        } else {
            AcceptorState::Active
        }
    }

    pub(crate) fn ignored_collects(&self) -> u64 {
        self.stats.ignored_collects
    }

    pub(crate) fn received_heartbeats(&self) -> u64 {
        self.stats.received_heartbeats
    }

    fn accepts_leader(&self, collect: &Collect) -> bool {
        let last = match &self.last_collect {
            Some(last) => last,
            None => return true,
        };
        if collect.same_leader(last) {
            return true;
        }

        match self.last_leader_action {
            Some(at) => Instant::now() > at + self.leader_lease,
            None => true,
        }
    }

    fn supersedes_last(&self, collect: &Collect) -> bool {
        self.last_collect
            .as_ref()
            .map_or(true, |last| collect.supersedes(last))
    }

    fn has_matching_begin(&self, learned: &Learned) -> bool {
        self.cached_begins
            .get(&learned.seq_num)
            .map_or(false, |begin| begin.round == learned.round)
    }

    fn last_round(&self) -> Round {
        self.last_collect.as_ref().map_or(NO_ROUND, |last| last.round)
    }

    fn send_last(&self, to: NodeId, seq_num: SeqNum) {
        let (round, value) = match self.cached_begins.get(&seq_num) {
            Some(begin) => (begin.round, begin.value.clone()),
            None => (NO_ROUND, Proposal::NoValue),
        };

        self.send(
            PaxosMessage::Last(Last {
                seq_num,
                low_watermark: self.watermark.seq_num,
                round,
                value,
            }),
            to,
        );
    }

    fn reject(&self, to: NodeId, seq_num: SeqNum) {
        let leader = self.last_collect.as_ref().map(|last| last.leader);
        self.send(
            PaxosMessage::OldRound(OldRound {
                seq_num,
                last_round: self.last_round(),
                leader,
            }),
            to,
        );
    }

    // Replies are held back while recovering. Leaders retry.
    fn send(&self, message: PaxosMessage, to: NodeId) {
        if self.recovery.is_some() {
            slog::debug!(self.logger, "Recovering, not sending {:?}", message);
            return;
        }
        self.transport.send(message, Destination::Node(to));
    }

    fn write(&self, packet: &Packet, force: bool) -> Result<Offset, StorageFault> {
        let record = encode_packet(packet).map_err(StorageFault::Encode)?;
        self.storage.put(record, force).map_err(StorageFault::Write)
    }

    fn signal(&self, outcome: VoteOutcome) {
        self.outcome_publisher.publish(&self.logger, outcome);
    }
}
