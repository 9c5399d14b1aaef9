use crate::messages::{self, NodeId, Packet, PaxosMessage};
use crate::transport::{Destination, Stream, Transport};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type DropFilter = Box<dyn Fn(&Packet, NodeId) -> bool + Send + Sync>;

/// LocalNetwork connects replicas living in the same process. Every packet passes through the
/// wire codec. Packets can be dropped by predicate, and nodes can be cut off, to simulate an
/// unreliable network.
pub struct LocalNetwork {
    logger: slog::Logger,
    state: Mutex<NetworkState>,
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Packet>>,
    isolated: HashSet<NodeId>,
    drop_filter: Option<DropFilter>,
}

impl LocalNetwork {
    pub fn new(logger: slog::Logger) -> Arc<Self> {
        Arc::new(LocalNetwork {
            logger: logger.new(slog::o!("Component" => "LocalNetwork")),
            state: Mutex::new(NetworkState::default()),
        })
    }

    /// Attach `node` to the network. The receiver yields every packet addressed to it.
    pub fn join(self: &Arc<Self>, node: NodeId) -> (LocalTransport, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().inboxes.insert(node, tx);

        let transport = LocalTransport {
            network: self.clone(),
            local: node,
        };

        (transport, rx)
    }

    /// Detach `node`, as if its process died.
    pub fn leave(&self, node: NodeId) {
        self.lock().inboxes.remove(&node);
    }

    /// Cut `node` off from every other node. It can still talk to itself.
    pub fn isolate(&self, node: NodeId) {
        self.lock().isolated.insert(node);
    }

    pub fn heal(&self, node: NodeId) {
        self.lock().isolated.remove(&node);
    }

    /// Drop every datagram for which `filter(packet, destination)` returns true. Recovery streams
    /// are unaffected.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: Fn(&Packet, NodeId) -> bool + Send + Sync + 'static,
    {
        self.lock().drop_filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.lock().drop_filter = None;
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send_datagram(&self, packet: Packet, destination: Destination) {
        let state = self.lock();
        let targets: Vec<NodeId> = match destination {
            Destination::Broadcast => state.inboxes.keys().copied().collect(),
            Destination::Node(node) => vec![node],
        };

        for target in targets {
            if !state.can_reach(packet.source, target) {
                continue;
            }
            if let Some(filter) = &state.drop_filter {
                if filter(&packet, target) {
                    slog::debug!(self.logger, "Dropped {:?} to {}", packet.message, target);
                    continue;
                }
            }
            if let Err(e) = self.deliver(&state, &packet, target) {
                slog::debug!(self.logger, "Undeliverable packet to {}: {}", target, e);
            }
        }
    }

    fn deliver(&self, state: &NetworkState, packet: &Packet, target: NodeId) -> Result<(), io::Error> {
        let inbox = state
            .inboxes
            .get(&target)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "unknown node"))?;

        let bytes = messages::encode_packet(packet).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let decoded = messages::decode_packet(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        inbox
            .send(decoded)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "node stopped receiving"))
    }

    fn stream_packet(&self, from: NodeId, to: NodeId, packet: Packet) -> Result<(), io::Error> {
        let state = self.lock();
        if !state.can_reach(from, to) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "node unreachable"));
        }

        self.deliver(&state, &packet, to)
    }
}

impl NetworkState {
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        from == to || !(self.isolated.contains(&from) || self.isolated.contains(&to))
    }
}

#[derive(Clone)]
pub struct LocalTransport {
    network: Arc<LocalNetwork>,
    local: NodeId,
}

impl Transport for LocalTransport {
    fn local_address(&self) -> NodeId {
        self.local
    }

    fn send(&self, message: PaxosMessage, destination: Destination) {
        self.network.send_datagram(Packet::new(self.local, message), destination);
    }

    fn connect_to(&self, node: NodeId) -> Result<Box<dyn Stream>, io::Error> {
        if !self.network.lock().inboxes.contains_key(&node) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unknown node"));
        }

        Ok(Box::new(LocalStream {
            network: self.network.clone(),
            from: self.local,
            to: node,
        }))
    }
}

struct LocalStream {
    network: Arc<LocalNetwork>,
    from: NodeId,
    to: NodeId,
}

impl Stream for LocalStream {
    fn send(&mut self, packet: Packet) -> Result<(), io::Error> {
        self.network.stream_packet(self.from, self.to, packet)
    }

    fn close(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Accept, Need};
    use std::net::SocketAddr;

    fn node(port: u16) -> NodeId {
        NodeId::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn accept(seq_num: i64) -> PaxosMessage {
        PaxosMessage::Accept(Accept { seq_num, round: 1 })
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        // -- setup --
        let network = LocalNetwork::new(logger());
        let (t1, mut rx1) = network.join(node(1));
        let (_t2, mut rx2) = network.join(node(2));

        // -- execute & verify --
        t1.send(accept(0), Destination::Broadcast);

        for rx in [&mut rx1, &mut rx2].iter_mut() {
            let packet = rx.recv().await.unwrap();
            assert_eq!(packet.source, node(1));
            assert_eq!(packet.message, accept(0));
        }
    }

    #[tokio::test]
    async fn isolation_and_drop_filter() {
        // -- setup --
        let network = LocalNetwork::new(logger());
        let (t1, mut rx1) = network.join(node(1));
        let (_t2, mut rx2) = network.join(node(2));

        // -- execute & verify --
        network.isolate(node(1));
        t1.send(accept(0), Destination::Broadcast);
        assert_eq!(rx1.recv().await.unwrap().message, accept(0));
        assert!(rx2.try_recv().is_err());

        network.heal(node(1));
        network.set_drop_filter(|packet, _| packet.message.seq_num() == 1);
        t1.send(accept(1), Destination::Node(node(2)));
        t1.send(accept(2), Destination::Node(node(2)));
        assert_eq!(rx2.recv().await.unwrap().message, accept(2));
    }

    #[tokio::test]
    async fn stream_keeps_original_source() {
        // -- setup --
        let network = LocalNetwork::new(logger());
        let (t1, _rx1) = network.join(node(1));
        let (_t2, mut rx2) = network.join(node(2));
        let replayed = Packet::new(
            node(3),
            PaxosMessage::Need(Need {
                min_seq: 0,
                max_seq: 1,
            }),
        );

        // -- execute & verify --
        let mut stream = t1.connect_to(node(2)).unwrap();
        stream.send(replayed.clone()).unwrap();
        stream.close();

        assert_eq!(rx2.recv().await.unwrap(), replayed);
        assert!(t1.connect_to(node(9)).is_err());
    }
}
