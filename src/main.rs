use bytes::Bytes;
use paxos::{CheckpointHandle, InMemoryLog, LocalNetwork, NodeId, PaxosClientConfig, PaxosOptions};
use slog::Drain;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

const CLUSTER_SIZE: u16 = 3;

/// Runs a three replica cluster in one process and agrees on a handful of values.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let network = LocalNetwork::new(logger.clone());

    let mut clients = Vec::with_capacity(CLUSTER_SIZE as usize);
    for port in 1..=CLUSTER_SIZE {
        let node = NodeId::new(SocketAddr::from(([127, 0, 0, 1], 9000 + port)));
        let (transport, inbound) = network.join(node);
        let config = PaxosClientConfig {
            transport: Arc::new(transport),
            inbound,
            storage: Arc::new(InMemoryLog::create()),
            cluster_size: CLUSTER_SIZE as usize,
            checkpoint: CheckpointHandle::initial(),
            metadata: Bytes::from(format!("replica-{}", port)),
            info_logger: logger.new(slog::o!("ReplicaId" => node.to_string())),
            options: PaxosOptions {
                heartbeat_interval: Some(Duration::from_millis(100)),
                unresponsiveness_threshold: Some(Duration::from_millis(500)),
                ..Default::default()
            },
        };
        clients.push(paxos::try_create_paxos_client(config).await?);
    }

    let proposer = &clients[0];
    proposer.failure_detector().barrier_majority().await;
    let mut outcomes = clients[CLUSTER_SIZE as usize - 1].outcomes();

    for i in 0..5 {
        let outcome = proposer.submit(Bytes::from(format!("value-{}", i))).await?;
        slog::info!(logger, "Submitted value-{}: {:?} at seq {}", i, outcome.outcome, outcome.seq_num);
    }

    for _ in 0..5 {
        if let Some(learned) = outcomes.next().await {
            slog::info!(logger, "Replica 3 learned {:?} at seq {}", learned.value, learned.seq_num);
        }
    }

    for client in clients {
        client.shutdown().await?;
    }

    Ok(())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
