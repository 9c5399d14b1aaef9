use crate::actor::{ActorClient, ReplicaActor, WeakActorClient};
use crate::api::client::PaxosClient;
use crate::api::options::PaxosOptionsValidated;
use crate::api::outcome_stream::OutcomePublisher;
use crate::commitlog::LogStorage;
use crate::failure_detector::{FailureDetector, FailureDetectorError, HeartbeaterHandle};
use crate::messages::{NodeId, Packet, PaxosMessage};
use crate::replica::{CheckpointHandle, PaxosError, Replica, ReplicaConfig, StorageFault};
use crate::transport::Transport;
use crate::PaxosOptions;
use bytes::Bytes;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct PaxosClientConfig {
    pub transport: Arc<dyn Transport>,
    /// Every packet the transport receives for this replica.
    pub inbound: mpsc::UnboundedReceiver<Packet>,
    pub storage: Arc<dyn LogStorage>,
    pub cluster_size: usize,
    /// Where to resume from. `CheckpointHandle::initial()` for a replica with no saved state.
    /// Must be one of this replica's own checkpoints, since its offset points into `storage`.
    /// A peer's checkpoint goes through `PaxosClient::bring_up_to_date()` instead.
    pub checkpoint: CheckpointHandle,
    /// Broadcast with every heartbeat, readable by peers through their failure detector.
    pub metadata: Bytes,
    pub info_logger: slog::Logger,
    pub options: PaxosOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum PaxosClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("Invalid cluster")]
    InvalidCluster(#[from] FailureDetectorError),
    #[error("Log initialization failure")]
    LogInitialization(#[from] StorageFault),
}

const ACTOR_QUEUE_SIZE: usize = 64;

pub async fn try_create_paxos_client(config: PaxosClientConfig) -> Result<PaxosClient, PaxosClientCreationError> {
    let root_logger = config.info_logger;
    let local = config.transport.local_address();

    let options = PaxosOptionsValidated::try_from(config.options)
        .map_err(|e| PaxosClientCreationError::IllegalClientOptions(e.to_string()))?;

    let failure_detector = FailureDetector::new(
        root_logger.clone(),
        config.cluster_size,
        options.unresponsiveness_threshold,
    )?;

    let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_SIZE);
    let outcome_publisher = OutcomePublisher::new();
    let startup_outcomes = outcome_publisher.subscribe();

    let mut replica = Replica::new(ReplicaConfig {
        logger: root_logger.clone(),
        transport: config.transport.clone(),
        storage: config.storage,
        failure_detector: failure_detector.clone(),
        outcome_publisher: outcome_publisher.clone(),
        actor_client: actor_client.weak(),
        leader_lease: options.leader_lease,
        recovery_grace_period: options.recovery_grace_period,
        interaction_timeout: options.leader_interaction_timeout,
        max_tries: options.leader_max_tries,
    });
    replica.open(&config.checkpoint)?;

    let replica_actor = ReplicaActor::new(root_logger.clone(), actor_queue_rx, replica);
    tokio::spawn(replica_actor.run_event_loop());

    failure_detector.spawn_scanner();
    let heartbeater = HeartbeaterHandle::spawn_heartbeater(config.transport, config.metadata, options.heartbeat_interval);

    let background_stopper = CancellationToken::new();
    tokio::spawn(run_inbound_pump(
        root_logger.clone(),
        config.inbound,
        failure_detector.clone(),
        actor_client.weak(),
        background_stopper.clone(),
    ));
    tokio::spawn(run_eviction_forwarder(
        root_logger.clone(),
        failure_detector.subscribe_evictions(),
        actor_client.weak(),
        background_stopper.clone(),
    ));

    slog::info!(root_logger, "Replica {} started in a cluster of {}", local, config.cluster_size);

    Ok(PaxosClient {
        logger: root_logger,
        local,
        actor_client,
        outcome_publisher,
        startup_outcomes: Mutex::new(Some(startup_outcomes)),
        failure_detector,
        _heartbeater: heartbeater,
        _background_tasks: background_stopper.drop_guard(),
    })
}

// Heartbeats go straight to the detector. Everything else is for the replica's event loop.
async fn run_inbound_pump(
    logger: slog::Logger,
    mut inbound: mpsc::UnboundedReceiver<Packet>,
    failure_detector: FailureDetector,
    actor_client: WeakActorClient,
    stopper: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = stopper.cancelled() => break,
            packet = inbound.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        match packet.message {
            PaxosMessage::Heartbeat(heartbeat) => {
                failure_detector.process_heartbeat(packet.source, heartbeat.metadata, Instant::now());
            }
            _ => {
                let delivered = match actor_client.upgrade() {
                    Some(client) => client.packet_received(packet).await,
                    None => Err(PaxosError::Stopped),
                };
                if delivered.is_err() {
                    break;
                }
            }
        }
    }

    slog::debug!(logger, "Inbound pump exited");
}

async fn run_eviction_forwarder(
    logger: slog::Logger,
    mut evictions: broadcast::Receiver<NodeId>,
    actor_client: WeakActorClient,
    stopper: CancellationToken,
) {
    loop {
        let evicted = tokio::select! {
            _ = stopper.cancelled() => break,
            evicted = evictions.recv() => evicted,
        };

        match evicted {
            Ok(node) => {
                let forwarded = match actor_client.upgrade() {
                    Some(client) => client.member_evicted(node).await,
                    None => Err(PaxosError::Stopped),
                };
                if forwarded.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                slog::warn!(logger, "Missed {} evictions", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    slog::debug!(logger, "Eviction forwarder exited");
}
