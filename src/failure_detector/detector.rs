use crate::failure_detector::membership::{MemberSet, Membership};
use crate::messages::NodeId;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FailureDetectorError {
    #[error("cluster size must be odd, got {0}")]
    EvenClusterSize(usize),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberInfo {
    pub metadata: Bytes,
    pub last_heartbeat: Instant,
}

pub type Members = HashMap<NodeId, MemberInfo>;

/// FailureDetector tracks which replicas are alive, based on the heartbeats they broadcast.
///
/// It is shared by every component of a replica. Calls never block beyond a short internal lock,
/// and `barrier()` hands back a future instead of waiting.
#[derive(Clone)]
pub struct FailureDetector {
    shared: Arc<Shared>,
}

struct Shared {
    logger: slog::Logger,
    majority: usize,
    unresponsiveness_threshold: Duration,
    state: Mutex<State>,
    evictions: broadcast::Sender<NodeId>,
    scan_stopper: CancellationToken,
}

#[derive(Default)]
struct State {
    members: Members,
    pinned: Option<Pinned>,
    barriers: Vec<Barrier>,
    live_snapshots: usize,
}

enum Pinned {
    Open,
    Fixed(HashSet<NodeId>),
}

struct Barrier {
    required: usize,
    notify: oneshot::Sender<Members>,
}

impl FailureDetector {
    pub fn new(
        logger: slog::Logger,
        cluster_size: usize,
        unresponsiveness_threshold: Duration,
    ) -> Result<Self, FailureDetectorError> {
        if cluster_size % 2 == 0 {
            return Err(FailureDetectorError::EvenClusterSize(cluster_size));
        }

        let (evictions, _) = broadcast::channel(64);
        let shared = Shared {
            logger: logger.new(slog::o!("Component" => "FailureDetector")),
            majority: cluster_size / 2 + 1,
            unresponsiveness_threshold,
            state: Mutex::new(State::default()),
            evictions,
            scan_stopper: CancellationToken::new(),
        };

        Ok(FailureDetector {
            shared: Arc::new(shared),
        })
    }

    /// Start evicting silent members, scanning five times per unresponsiveness threshold. The scan
    /// stops on `stop()`, or once every handle to this detector is gone.
    pub fn spawn_scanner(&self) {
        let weak_shared = Arc::downgrade(&self.shared);
        let stopper = self.shared.scan_stopper.clone();
        let scan_interval = self.shared.unresponsiveness_threshold / 5;

        tokio::task::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopper.cancelled() => return,
                    _ = tokio::time::sleep(scan_interval) => {}
                }

                match Weak::upgrade(&weak_shared) {
                    Some(shared) => {
                        FailureDetector { shared }.scan(Instant::now());
                    }
                    None => return,
                }
            }
        });
    }

    pub fn stop(&self) {
        self.shared.scan_stopper.cancel();
    }

    pub fn majority(&self) -> usize {
        self.shared.majority
    }

    pub fn process_heartbeat(&self, node: NodeId, metadata: Bytes, timestamp: Instant) {
        let mut state = self.lock();
        if let Some(Pinned::Fixed(allowed)) = &state.pinned {
            if !allowed.contains(&node) {
                return;
            }
        }

        let previous = state.members.insert(
            node,
            MemberInfo {
                metadata,
                last_heartbeat: timestamp,
            },
        );
        if previous.is_none() {
            slog::info!(self.shared.logger, "Member {} is alive", node);
        }

        state.release_barriers();
    }

    /// Evict every member whose last heartbeat is older than the unresponsiveness threshold.
    /// Returns the evicted members.
    pub fn scan(&self, now: Instant) -> Vec<NodeId> {
        let mut state = self.lock();
        if let Some(Pinned::Open) = state.pinned {
            return vec![];
        }

        let threshold = self.shared.unresponsiveness_threshold;
        let evicted: Vec<NodeId> = state
            .members
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_heartbeat) > threshold)
            .map(|(node, _)| *node)
            .collect();

        for node in evicted.iter() {
            state.members.remove(node);
            slog::info!(self.shared.logger, "Member {} is unresponsive, evicted", node);
            // Nobody listening is fine.
            let _ = self.shared.evictions.send(*node);
        }

        evicted
    }

    pub fn members(&self) -> Members {
        self.lock().members.clone()
    }

    pub fn is_member(&self, node: NodeId) -> bool {
        let state = self.lock();
        match state.pinned {
            Some(Pinned::Open) => true,
            _ => state.members.contains_key(&node),
        }
    }

    /// Resolves once at least `required` members are alive, with the membership at that point.
    /// Resolves to `None` if the detector goes away first.
    pub fn barrier(&self, required: usize) -> impl Future<Output = Option<Members>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            let satisfied = matches!(state.pinned, Some(Pinned::Open)) || state.members.len() >= required;
            if satisfied {
                let _ = tx.send(state.members.clone());
            } else {
                state.barriers.push(Barrier { required, notify: tx });
            }
        }

        async move { rx.await.ok() }
    }

    /// Same as `barrier()`, requiring a majority.
    pub fn barrier_majority(&self) -> impl Future<Output = Option<Members>> + Send + 'static {
        self.barrier(self.majority())
    }

    /// Restrict membership to exactly `members`, or lift the restriction with `None`.
    pub fn pin(&self, members: Option<HashSet<NodeId>>) {
        let mut state = self.lock();
        match members {
            Some(allowed) => {
                state.members.retain(|node, _| allowed.contains(node));
                state.pinned = Some(Pinned::Fixed(allowed));
            }
            None => state.pinned = None,
        }
    }

    /// Treat every address as a live member. For tests that don't run heartbeats.
    pub fn pin_open(&self) {
        let mut state = self.lock();
        state.pinned = Some(Pinned::Open);
        state.release_barriers();
    }

    pub fn unpin(&self) {
        self.pin(None);
    }

    pub fn random_member(&self, excluding: NodeId) -> Option<NodeId> {
        self.lock()
            .members
            .keys()
            .filter(|node| **node != excluding)
            .copied()
            .choose(&mut rand::thread_rng())
    }

    /// Number of membership snapshots handed out and not yet disposed.
    pub fn live_snapshot_count(&self) -> usize {
        self.lock().live_snapshots
    }

    pub(crate) fn subscribe_evictions(&self) -> broadcast::Receiver<NodeId> {
        self.shared.evictions.subscribe()
    }

    /// A snapshot of the current membership, for one leader's communication rounds.
    pub(crate) fn snapshot(&self) -> Membership {
        let mut state = self.lock();
        let members = match state.pinned {
            Some(Pinned::Open) => MemberSet::Open,
            _ => MemberSet::Fixed(state.members.keys().copied().collect()),
        };
        state.live_snapshots += 1;

        let registration = SnapshotRegistration {
            shared: Arc::downgrade(&self.shared),
        };

        Membership::new(members, self.shared.majority, registration)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.scan_stopper.cancel();
    }
}

impl State {
    fn release_barriers(&mut self) {
        let size = match self.pinned {
            Some(Pinned::Open) => usize::MAX,
            _ => self.members.len(),
        };

        let (ready, pending): (Vec<Barrier>, Vec<Barrier>) =
            self.barriers.drain(..).partition(|barrier| barrier.required <= size);
        self.barriers = pending;

        for barrier in ready {
            let _ = barrier.notify.send(self.members.clone());
        }
    }
}

/// Ties a membership snapshot to the detector that issued it. Dropping it releases the snapshot.
pub(crate) struct SnapshotRegistration {
    shared: Weak<Shared>,
}

impl Drop for SnapshotRegistration {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.lock();
            state.live_snapshots = state.live_snapshots.saturating_sub(1);
        }
    }
}
