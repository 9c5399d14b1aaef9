use crate::replica::VoteOutcome;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Fans every outcome out to all registered `OutcomeStream`s. Streams that were dropped are
/// pruned on the next publish.
#[derive(Clone, Default)]
pub(crate) struct OutcomePublisher {
    listeners: Arc<Mutex<Listeners>>,
}

#[derive(Default)]
struct Listeners {
    senders: Vec<mpsc::UnboundedSender<VoteOutcome>>,
    closed: bool,
}

impl OutcomePublisher {
    pub(crate) fn new() -> Self {
        OutcomePublisher::default()
    }

    pub(crate) fn subscribe(&self) -> OutcomeStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.lock_listeners();
        // Once closed, the sender is dropped right away and the stream ends.
        if !listeners.closed {
            listeners.senders.push(tx);
        }

        OutcomeStream { receiver: rx }
    }

    pub(crate) fn publish(&self, logger: &slog::Logger, outcome: VoteOutcome) {
        slog::debug!(logger, "Publishing {:?} for seq {}", outcome.outcome, outcome.seq_num);

        let mut listeners = self.lock_listeners();
        listeners.senders.retain(|listener| listener.send(outcome.clone()).is_ok());
        if listeners.senders.is_empty() {
            slog::debug!(logger, "No outcome listeners registered");
        }
    }

    /// End every stream. Outcomes already queued are still delivered.
    pub(crate) fn close(&self) {
        let mut listeners = self.lock_listeners();
        listeners.closed = true;
        listeners.senders.clear();
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        // A poisoned list is still a valid list of senders.
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// For the application to follow decisions and lifecycle changes of its replica. Every listener
/// sees each outcome in the order the replica produced them.
pub struct OutcomeStream {
    receiver: mpsc::UnboundedReceiver<VoteOutcome>,
}

impl OutcomeStream {
    /// next returns the next outcome, or `None` once the replica has shut down.
    pub async fn next(&mut self) -> Option<VoteOutcome> {
        self.receiver.recv().await
    }

    /// try_next returns an outcome only if one is already queued.
    pub fn try_next(&mut self) -> Option<VoteOutcome> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Proposal;
    use crate::replica::Outcome;

    fn decision(seq_num: i64) -> VoteOutcome {
        VoteOutcome::new(Outcome::Decision, seq_num, 1, Proposal::NoValue, None)
    }

    #[tokio::test]
    async fn every_listener_sees_every_outcome() {
        // -- setup --
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let publisher = OutcomePublisher::new();
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        // -- execute --
        publisher.publish(&logger, decision(0));
        publisher.publish(&logger, decision(1));

        // -- verify --
        for stream in [&mut first, &mut second].iter_mut() {
            assert_eq!(stream.next().await, Some(decision(0)));
            assert_eq!(stream.next().await, Some(decision(1)));
        }
    }

    #[tokio::test]
    async fn dropped_listener_is_pruned() {
        // -- setup --
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let publisher = OutcomePublisher::new();
        let dropped = publisher.subscribe();
        let mut kept = publisher.subscribe();
        drop(dropped);

        // -- execute --
        publisher.publish(&logger, decision(3));

        // -- verify --
        assert_eq!(publisher.lock_listeners().senders.len(), 1);
        assert_eq!(kept.try_next(), Some(decision(3)));
        assert_eq!(kept.try_next(), None);
    }

    #[tokio::test]
    async fn close_ends_streams_after_queued_outcomes() {
        // -- setup --
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let publisher = OutcomePublisher::new();
        let mut stream = publisher.subscribe();
        publisher.publish(&logger, decision(0));

        // -- execute --
        publisher.close();

        // -- verify --
        assert_eq!(stream.next().await, Some(decision(0)));
        assert_eq!(stream.next().await, None);
        assert_eq!(publisher.subscribe().next().await, None);
    }
}
