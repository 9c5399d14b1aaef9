use crate::messages::{Heartbeat, PaxosMessage};
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Keeps broadcasting this replica's heartbeat until dropped.
pub(crate) struct HeartbeaterHandle {
    _to_drop: DropGuard,
}

impl HeartbeaterHandle {
    pub(crate) fn spawn_heartbeater(transport: Arc<dyn Transport>, metadata: Bytes, interval: Duration) -> Self {
        let stopper = CancellationToken::new();
        let stop_check = stopper.clone();

        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop_check.cancelled() => return,
                    _ = ticker.tick() => {
                        let heartbeat = Heartbeat {
                            metadata: metadata.clone(),
                        };
                        transport.send(PaxosMessage::Heartbeat(heartbeat), transport.broadcast_address());
                    }
                }
            }
        });

        HeartbeaterHandle {
            _to_drop: stopper.drop_guard(),
        }
    }
}
