use crate::actor::{Callback, WeakActorClient};
use crate::api::OutcomePublisher;
use crate::commitlog::LogStorage;
use crate::failure_detector::FailureDetector;
use crate::messages::{Classification, NodeId, Packet, Proposal, NO_ROUND};
use crate::replica::acceptor::{AcceptorLearner, AcceptorLearnerConfig, CheckpointHandle};
use crate::replica::leader::{AcceptorView, LeaderContext, LeaderFactory};
use crate::replica::replica_api::{PaxosError, ReplicaStatus, StorageFault, TimerTick};
use crate::replica::VoteOutcome;
use crate::transport::Transport;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

pub(crate) struct ReplicaConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) storage: Arc<dyn LogStorage>,
    pub(crate) failure_detector: FailureDetector,
    pub(crate) outcome_publisher: OutcomePublisher,
    pub(crate) actor_client: WeakActorClient,
    pub(crate) leader_lease: Duration,
    pub(crate) recovery_grace_period: Duration,
    pub(crate) interaction_timeout: Duration,
    pub(crate) max_tries: u32,
}

/// Replica ties the acceptor/learner to the leader factory, and routes each event to whichever
/// of them it's for. It lives inside the replica actor.
pub(crate) struct Replica {
    logger: slog::Logger,
    acceptor: AcceptorLearner,
    leaders: LeaderFactory,
    // Set once the log has failed us. Nothing is safe to do after that.
    halted: Option<String>,
}

impl Replica {
    pub(crate) fn new(config: ReplicaConfig) -> Self {
        let local = config.transport.local_address();
        let logger = config.logger.new(slog::o!("Replica" => local.to_string()));

        let leaders = LeaderFactory::new(
            LeaderContext {
                logger: logger.clone(),
                local,
                transport: config.transport.clone(),
                failure_detector: config.failure_detector.clone(),
                actor_client: config.actor_client.clone(),
                interaction_timeout: config.interaction_timeout,
                max_tries: config.max_tries,
            },
            config.leader_lease,
        );
        let acceptor = AcceptorLearner::new(AcceptorLearnerConfig {
            logger: logger.clone(),
            transport: config.transport,
            storage: config.storage,
            failure_detector: config.failure_detector,
            outcome_publisher: config.outcome_publisher,
            actor_client: config.actor_client,
            leader_lease: config.leader_lease,
            recovery_grace_period: config.recovery_grace_period,
        });

        Replica {
            logger,
            acceptor,
            leaders,
            halted: None,
        }
    }

    pub(crate) fn open(&mut self, handle: &CheckpointHandle) -> Result<(), StorageFault> {
        self.acceptor.open(handle)
    }

    pub(crate) fn handle_packet(&mut self, packet: Packet) {
        if self.halted.is_some() {
            return;
        }

        match packet.message.classification() {
            Classification::AcceptorLearner | Classification::Recovery => {
                if let Err(fault) = self.acceptor.process_message(packet) {
                    self.halt(fault);
                    return;
                }
                if self.acceptor.is_out_of_date() {
                    self.leaders.acceptor_out_of_date();
                }
            }
            Classification::Leader => {
                let view = self.acceptor_view();
                self.leaders.message_received(&packet, view);
            }
            Classification::FailureDetector => {
                slog::debug!(self.logger, "Heartbeat from {} reached the replica", packet.source);
            }
        }
    }

    pub(crate) fn submit(&mut self, proposal: Proposal, callback: Callback<VoteOutcome, PaxosError>) {
        if let Err(e) = self.check_halted() {
            callback.send(Err(e));
            return;
        }

        let view = self.acceptor_view();
        self.leaders.submit(proposal, callback, view);
    }

    pub(crate) fn timer_tick(&mut self, tick: TimerTick) {
        if self.halted.is_some() {
            return;
        }

        let view = self.acceptor_view();
        match tick {
            TimerTick::LeaderInteraction { seq_num, generation } => {
                self.leaders.interaction_timeout(seq_num, generation, view);
            }
            TimerTick::RecoveryWatchdog { generation } => {
                self.acceptor.recovery_watchdog(generation);
            }
            TimerTick::LeaseHeartbeat { generation } => {
                self.leaders.heartbeat_tick(generation, view);
            }
        }
    }

    pub(crate) fn member_evicted(&mut self, node: NodeId) {
        if self.halted.is_some() {
            return;
        }

        let view = self.acceptor_view();
        self.leaders.member_evicted(node, view);
    }

    pub(crate) fn new_checkpoint(&self) -> Result<CheckpointHandle, PaxosError> {
        self.check_halted()?;
        Ok(self.acceptor.new_checkpoint())
    }

    pub(crate) fn checkpoint_saved(&mut self, handle: CheckpointHandle) -> Result<(), PaxosError> {
        self.check_halted()?;
        self.acceptor.checkpoint_saved(&handle).map_err(|fault| self.halt(fault))
    }

    pub(crate) fn bring_up_to_date(&mut self, handle: CheckpointHandle) -> Result<bool, PaxosError> {
        self.check_halted()?;
        Ok(self.acceptor.bring_up_to_date(&handle))
    }

    pub(crate) fn status(&self) -> Result<ReplicaStatus, PaxosError> {
        self.check_halted()?;

        Ok(ReplicaStatus {
            acceptor_state: self.acceptor.state(),
            watermark: self.acceptor.watermark(),
            last_collect: self.acceptor.last_collect().cloned(),
            ignored_collects: self.acceptor.ignored_collects(),
            received_heartbeats: self.acceptor.received_heartbeats(),
            active_leader: self.leaders.active_leader(),
        })
    }

    pub(crate) fn shutdown(&mut self) {
        slog::info!(self.logger, "Shutting down");
        self.leaders.shutdown();
        self.acceptor.close();
    }

    fn acceptor_view(&self) -> AcceptorView {
        AcceptorView {
            watermark: self.acceptor.watermark().seq_num,
            last_round: self.acceptor.last_collect().map_or(NO_ROUND, |collect| collect.round),
            out_of_date: self.acceptor.is_out_of_date(),
        }
    }

    fn check_halted(&self) -> Result<(), PaxosError> {
        match &self.halted {
            Some(reason) => Err(PaxosError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    fn halt(&mut self, fault: StorageFault) -> PaxosError {
        let reason = match fault.source() {
            Some(cause) => format!("{}: {}", fault, cause),
            None => fault.to_string(),
        };
        slog::crit!(self.logger, "Halting, {}", reason);

        self.leaders.shutdown();
        self.halted = Some(reason);
        PaxosError::Storage(fault)
    }
}
