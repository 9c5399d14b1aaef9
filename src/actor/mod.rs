use crate::messages::{NodeId, Packet, Proposal};
use crate::replica::{CheckpointHandle, PaxosError, Replica, ReplicaStatus, TimerTick, VoteOutcome};
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// Design choice: Log writes are synchronous inside the event loop. Only log streaming to a
// recovering peer runs off the loop, on a blocking task.
#[derive(Debug)]
pub(crate) enum Event {
    // Inbound protocol traffic, routed to the acceptor/learner or the leaders.
    Packet(Packet),

    // Application asks for a value to be agreed. Answered once the vote resolves.
    Submit(Proposal, Callback<VoteOutcome, PaxosError>),

    // Leader interaction timeouts, the recovery watchdog, and lease heartbeats.
    Timer(TimerTick),

    // Failure detector declared a member dead.
    MemberEvicted(NodeId),

    NewCheckpoint(Callback<CheckpointHandle, PaxosError>),
    CheckpointSaved(CheckpointHandle, Callback<(), PaxosError>),
    BringUpToDate(CheckpointHandle, Callback<bool, PaxosError>),
    Status(Callback<ReplicaStatus, PaxosError>),
    Shutdown(Callback<(), PaxosError>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    #[cfg(test)]
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<O, E>>) {
        let (tx, rx) = oneshot::channel();
        (Callback(tx), rx)
    }

    pub(crate) fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// Handle for timers and checkpoint handles, which must not keep the event loop alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);

        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn submit(&self, proposal: Proposal) -> Result<VoteOutcome, PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Submit(proposal, Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    pub(crate) async fn packet_received(&self, packet: Packet) -> Result<(), PaxosError> {
        self.send(Event::Packet(packet)).await
    }

    pub(crate) async fn member_evicted(&self, node: NodeId) -> Result<(), PaxosError> {
        self.send(Event::MemberEvicted(node)).await
    }

    pub(crate) async fn new_checkpoint(&self) -> Result<CheckpointHandle, PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::NewCheckpoint(Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    pub(crate) async fn checkpoint_saved(&self, handle: CheckpointHandle) -> Result<(), PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::CheckpointSaved(handle, Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    pub(crate) async fn bring_up_to_date(&self, handle: CheckpointHandle) -> Result<bool, PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::BringUpToDate(handle, Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    pub(crate) async fn status(&self) -> Result<ReplicaStatus, PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Status(Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), PaxosError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Shutdown(Callback(tx))).await?;

        Self::await_reply(rx).await
    }

    async fn send(&self, event: Event) -> Result<(), PaxosError> {
        self.sender.send(event).await.map_err(|_| PaxosError::Stopped)
    }

    async fn await_reply<O>(rx: oneshot::Receiver<Result<O, PaxosError>>) -> Result<O, PaxosError> {
        // Dropped callback means the event loop went away mid-request.
        rx.await.unwrap_or(Err(PaxosError::Stopped))
    }
}

impl WeakActorClient {
    pub(crate) fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(crate) async fn timer_tick(&self, tick: TimerTick) {
        if let Some(client) = self.upgrade() {
            // Actor already gone, nobody cares about the tick.
            let _ = client.send(Event::Timer(tick)).await;
        }
    }
}

/// ReplicaActor is the replica logic in actor model. All protocol state lives in the one task
/// that runs `run_event_loop()`.
pub(crate) struct ReplicaActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica,
}

impl ReplicaActor {
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            let is_shutdown = matches!(event, Event::Shutdown(_));
            self.handle_event(event);
            if is_shutdown {
                // Refuse anything new, but answer what's already queued.
                self.receiver.close();
            }
        }

        slog::info!(self.logger, "Replica event loop exited");
    }

    // This must NOT be async. Any long running work must be spawned on another task and/or come
    // back to this actor as an event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Packet(packet) => {
                self.replica.handle_packet(packet);
            }
            Event::Submit(proposal, callback) => {
                self.replica.submit(proposal, callback);
            }
            Event::Timer(tick) => {
                self.replica.timer_tick(tick);
            }
            Event::MemberEvicted(node) => {
                self.replica.member_evicted(node);
            }
            Event::NewCheckpoint(callback) => {
                callback.send(self.replica.new_checkpoint());
            }
            Event::CheckpointSaved(handle, callback) => {
                callback.send(self.replica.checkpoint_saved(handle));
            }
            Event::BringUpToDate(handle, callback) => {
                callback.send(self.replica.bring_up_to_date(handle));
            }
            Event::Status(callback) => {
                callback.send(self.replica.status());
            }
            Event::Shutdown(callback) => {
                self.replica.shutdown();
                callback.send(Ok(()));
            }
        }
    }
}
