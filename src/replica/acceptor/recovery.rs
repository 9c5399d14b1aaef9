use crate::messages::{Packet, SeqNum};
use crate::replica::timers::ActorTimerHandle;

/// The instances a recovering acceptor/learner is missing: `(min_seq, max_seq]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct RecoveryWindow {
    pub(crate) min_seq: SeqNum,
    pub(crate) max_seq: SeqNum,
}

impl RecoveryWindow {
    pub(crate) fn new(min_seq: SeqNum, max_seq: SeqNum) -> Self {
        RecoveryWindow { min_seq, max_seq }
    }

    pub(crate) fn covers(&self, seq_num: SeqNum) -> bool {
        seq_num > self.min_seq && seq_num <= self.max_seq
    }
}

pub(super) struct Recovery {
    pub(super) window: RecoveryWindow,
    // Traffic beyond the window, held back until the window is filled.
    buffered: Vec<Packet>,
    pub(super) generation: u64,
    // Watermark at the last watchdog check. No movement between two checks means recovery stalled.
    pub(super) checked_watermark: SeqNum,
    _watchdog: Option<ActorTimerHandle>,
}

impl Recovery {
    pub(super) fn new(window: RecoveryWindow, watermark: SeqNum) -> Self {
        Recovery {
            window,
            buffered: vec![],
            generation: 0,
            checked_watermark: watermark,
            _watchdog: None,
        }
    }

    pub(super) fn buffer(&mut self, packet: Packet) {
        self.buffered.push(packet);
    }

    pub(super) fn arm_watchdog(&mut self, generation: u64, watchdog: ActorTimerHandle) {
        self.generation = generation;
        self._watchdog = Some(watchdog);
    }

    /// Buffered packets in sequence order. Packets of the same sequence keep their arrival order.
    pub(super) fn into_buffered(self) -> Vec<Packet> {
        let mut buffered = self.buffered;
        buffered.sort_by_key(|packet| packet.message.seq_num());

        buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Learned, NodeId, PaxosMessage};
    use std::net::SocketAddr;

    fn learned(seq_num: SeqNum, round: i64) -> Packet {
        Packet::new(
            NodeId::new(SocketAddr::from(([127, 0, 0, 1], 4000))),
            PaxosMessage::Learned(Learned { seq_num, round }),
        )
    }

    #[test]
    fn window_is_open_below_closed_above() {
        let window = RecoveryWindow::new(2, 4);

        assert!(!window.covers(2));
        assert!(window.covers(3));
        assert!(window.covers(4));
        assert!(!window.covers(5));
    }

    #[test]
    fn buffered_packets_drain_in_sequence_order() {
        // -- setup --
        let mut recovery = Recovery::new(RecoveryWindow::new(2, 4), 2);
        recovery.buffer(learned(7, 1));
        recovery.buffer(learned(5, 1));
        recovery.buffer(learned(5, 2));
        recovery.buffer(learned(6, 1));

        // -- execute --
        let drained: Vec<(SeqNum, i64)> = recovery
            .into_buffered()
            .into_iter()
            .map(|packet| match packet.message {
                PaxosMessage::Learned(l) => (l.seq_num, l.round),
                other => panic!("Unexpected {:?}", other),
            })
            .collect();

        // -- verify --
        assert_eq!(drained, vec![(5, 1), (5, 2), (6, 1), (7, 1)]);
    }
}
