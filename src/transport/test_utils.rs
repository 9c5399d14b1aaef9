use crate::messages::{NodeId, Packet, PaxosMessage};
use crate::transport::{Destination, Stream, Transport};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// RecordingTransport captures everything a component sends, so tests can assert on it.
#[derive(Clone)]
pub(crate) struct RecordingTransport {
    local: NodeId,
    sent: Arc<Mutex<Vec<(PaxosMessage, Destination)>>>,
    streamed: Arc<Mutex<Vec<(NodeId, Packet)>>>,
}

impl RecordingTransport {
    pub(crate) fn new(local: NodeId) -> Self {
        RecordingTransport {
            local,
            sent: Arc::new(Mutex::new(vec![])),
            streamed: Arc::new(Mutex::new(vec![])),
        }
    }

    pub(crate) fn take_sent(&self) -> Vec<(PaxosMessage, Destination)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub(crate) fn take_streamed(&self) -> Vec<(NodeId, Packet)> {
        std::mem::take(&mut *self.streamed.lock().unwrap())
    }

    /// Streams are written from a blocking task, so poll until `count` packets show up.
    pub(crate) async fn wait_for_streamed(&self, count: usize) -> Vec<(NodeId, Packet)> {
        let poll = async {
            loop {
                if self.streamed.lock().unwrap().len() >= count {
                    return self.take_streamed();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .expect("Unexpected timeout")
    }
}

impl Transport for RecordingTransport {
    fn local_address(&self) -> NodeId {
        self.local
    }

    fn send(&self, message: PaxosMessage, destination: Destination) {
        self.sent.lock().unwrap().push((message, destination));
    }

    fn connect_to(&self, node: NodeId) -> Result<Box<dyn Stream>, io::Error> {
        Ok(Box::new(RecordingStream {
            to: node,
            streamed: self.streamed.clone(),
        }))
    }
}

struct RecordingStream {
    to: NodeId,
    streamed: Arc<Mutex<Vec<(NodeId, Packet)>>>,
}

impl Stream for RecordingStream {
    fn send(&mut self, packet: Packet) -> Result<(), io::Error> {
        self.streamed.lock().unwrap().push((self.to, packet));
        Ok(())
    }

    fn close(self: Box<Self>) {}
}
