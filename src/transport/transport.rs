use crate::messages::{NodeId, Packet, PaxosMessage};
use std::io;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    /// Every replica, including the sender.
    Broadcast,
    Node(NodeId),
}

/// Transport is how a replica talks to its peers. Sends are fire-and-forget: a message may be
/// lost, and the protocol copes with that. `send()` must never block, because it's called from
/// the replica's event loop.
pub trait Transport: Send + Sync {
    fn local_address(&self) -> NodeId;

    fn broadcast_address(&self) -> Destination {
        Destination::Broadcast
    }

    /// Send `message` with this replica as the packet source.
    fn send(&self, message: PaxosMessage, destination: Destination);

    /// Open a reliable point to point channel, used to stream recovery records to a peer.
    fn connect_to(&self, node: NodeId) -> Result<Box<dyn Stream>, io::Error>;
}

/// Stream carries whole packets, keeping their original source, so a peer can replay records
/// that were logged from other replicas.
pub trait Stream: Send {
    fn send(&mut self, packet: Packet) -> Result<(), io::Error>;

    fn close(self: Box<Self>);
}
