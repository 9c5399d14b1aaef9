use crate::commitlog::{LogStorage, Offset};
use crate::messages::{decode_packet, Need, NodeId};
use crate::transport::Transport;
use std::io;
use std::sync::Arc;

/// Replay the decided instances a peer asked for, straight from the log, over a dedicated stream.
/// Runs on a blocking task so the event loop never waits on the peer.
pub(super) fn spawn_remote_streamer(
    logger: slog::Logger,
    storage: Arc<dyn LogStorage>,
    transport: Arc<dyn Transport>,
    requester: NodeId,
    need: Need,
) {
    tokio::task::spawn_blocking(move || match stream_range(storage.as_ref(), transport.as_ref(), requester, &need) {
        Ok(count) => slog::info!(logger, "Streamed {} records for {:?} to {}", count, need, requester),
        Err(e) => slog::warn!(logger, "Streaming {:?} to {} failed: {}", need, requester, e),
    });
}

fn stream_range(
    storage: &dyn LogStorage,
    transport: &dyn Transport,
    requester: NodeId,
    need: &Need,
) -> Result<usize, io::Error> {
    let mut stream = transport.connect_to(requester)?;
    let mut outcome: Result<usize, io::Error> = Ok(0);

    storage.replay(Offset::start(), &mut |_, record| {
        if outcome.is_err() {
            return;
        }
        // The log only holds packets this replica encoded itself.
        let packet = match decode_packet(&record) {
            Ok(packet) => packet,
            Err(_) => return,
        };

        let seq_num = packet.message.seq_num();
        if seq_num < need.min_seq || seq_num > need.max_seq {
            return;
        }
        match stream.send(packet) {
            Ok(()) => {
                if let Ok(count) = &mut outcome {
                    *count += 1;
                }
            }
            Err(e) => outcome = Err(e),
        }
    })?;

    stream.close();
    outcome
}
