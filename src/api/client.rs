use crate::actor::ActorClient;
use crate::api::outcome_stream::{OutcomePublisher, OutcomeStream};
use crate::failure_detector::{FailureDetector, HeartbeaterHandle};
use crate::messages::{NodeId, Proposal};
use crate::replica::{CheckpointHandle, PaxosError, ReplicaStatus, VoteOutcome};
use bytes::Bytes;
use std::sync::Mutex;
use tokio_util::sync::DropGuard;

/// PaxosClient is the application's handle on one replica. Dropping it stops the replica's
/// background tasks, same as `shutdown()` minus waiting for the event loop.
pub struct PaxosClient {
    pub(super) logger: slog::Logger,
    pub(super) local: NodeId,
    pub(super) actor_client: ActorClient,
    pub(super) outcome_publisher: OutcomePublisher,
    // Subscribed before the log was replayed, so it also carries replayed decisions.
    pub(super) startup_outcomes: Mutex<Option<OutcomeStream>>,
    pub(super) failure_detector: FailureDetector,
    pub(super) _heartbeater: HeartbeaterHandle,
    pub(super) _background_tasks: DropGuard,
}

impl PaxosClient {
    /// Propose `value` for the next free instance. Losing to another leader or value is an
    /// `Ok` outcome, the application decides whether to submit again.
    pub async fn submit(&self, value: Bytes) -> Result<VoteOutcome, PaxosError> {
        self.actor_client.submit(Proposal::Value(value)).await
    }

    /// A new listener for decisions and lifecycle changes. The first call returns a stream that
    /// also holds the decisions replayed from the log when the replica started.
    pub fn outcomes(&self) -> OutcomeStream {
        let startup = self
            .startup_outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        startup.unwrap_or_else(|| self.outcome_publisher.subscribe())
    }

    pub async fn new_checkpoint(&self) -> Result<CheckpointHandle, PaxosError> {
        self.actor_client.new_checkpoint().await
    }

    /// Adopt a checkpoint taken by a peer, typically after an OUT_OF_DATE outcome. Returns false
    /// if the checkpoint is behind this replica.
    pub async fn bring_up_to_date(&self, handle: &CheckpointHandle) -> Result<bool, PaxosError> {
        self.actor_client.bring_up_to_date(handle.clone()).await
    }

    pub async fn status(&self) -> Result<ReplicaStatus, PaxosError> {
        self.actor_client.status().await
    }

    pub fn local_address(&self) -> NodeId {
        self.local
    }

    pub fn failure_detector(&self) -> &FailureDetector {
        &self.failure_detector
    }

    pub async fn shutdown(self) -> Result<(), PaxosError> {
        slog::info!(self.logger, "Shutting down replica {}", self.local);
        self.actor_client.shutdown().await
    }
}

impl Drop for PaxosClient {
    fn drop(&mut self) {
        self.failure_detector.stop();
    }
}
