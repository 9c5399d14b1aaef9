use crate::actor::WeakActorClient;
use crate::replica::timers::time::{Clock, RealClock};
use crate::replica::TimerTick;
use tokio::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// One-shot timer that delivers a `TimerTick` to the replica actor. Dropping the handle cancels
/// the timer. A tick that already left is not recalled, so the actor must still check that the
/// tick's generation is current.
pub(crate) struct ActorTimerHandle {
    _to_drop: DropGuard,
}

struct ActorTimerTask<C: Clock> {
    stopped: CancellationToken,
    deadline: Instant,
    actor_client: WeakActorClient,
    tick: TimerTick,
    clock: C,
}

impl ActorTimerHandle {
    pub(crate) fn spawn_timer_task(delay: Duration, actor_client: WeakActorClient, tick: TimerTick) -> Self {
        let (task, handle) = ActorTimerTask::new(delay, actor_client, tick, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> ActorTimerTask<C> {
    fn new(delay: Duration, actor_client: WeakActorClient, tick: TimerTick, clock: C) -> (Self, ActorTimerHandle) {
        let stopper = CancellationToken::new();
        let task = ActorTimerTask {
            stopped: stopper.clone(),
            // Fix the deadline now, not when the task first gets polled.
            deadline: clock.now() + delay,
            actor_client,
            tick,
            clock,
        };

        (
            task,
            ActorTimerHandle {
                _to_drop: stopper.drop_guard(),
            },
        )
    }

    async fn run(self) {
        tokio::select! {
            _ = self.stopped.cancelled() => return,
            _ = self.clock.sleep_until(self.deadline) => {}
        }

        if self.stopped.is_cancelled() {
            return;
        }
        self.actor_client.timer_tick(self.tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::timers::test_utils::TestUtilActor;
    use crate::replica::timers::time;

    #[tokio::test]
    async fn actor_timer_fires_once_after_delay() {
        // -- setup --
        let delay = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let tick = TimerTick::LeaderInteraction {
            seq_num: 4,
            generation: 2,
        };
        let (mock_clock, mock_clock_controller) = time::mocked_clock();

        // -- execute & verify --
        let (task, _handle) = ActorTimerTask::new(delay, strong_actor_client.weak(), tick.clone(), mock_clock);
        let join_handle = tokio::task::spawn(task.run());

        mock_clock_controller.advance(delay / 2);
        actor.assert_no_event().await;

        mock_clock_controller.advance(delay / 2);
        actor.assert_timer_tick(tick).await;
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn dropped_handle_cancels_timer() {
        // -- setup --
        let delay = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mock_clock_controller) = time::mocked_clock();

        // -- execute & verify --
        let (task, handle) = ActorTimerTask::new(
            delay,
            strong_actor_client.weak(),
            TimerTick::RecoveryWatchdog { generation: 1 },
            mock_clock,
        );
        let join_handle = tokio::task::spawn(task.run());

        drop(handle);
        mock_clock_controller.advance(delay * 2);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn dropped_handle_stops_task_before_deadline() {
        // -- setup --
        let delay = Duration::from_secs(27);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, _mock_clock_controller) = time::mocked_clock();

        let mut join_handles = Vec::new();
        for generation in 0..100 {
            let (task, handle) = ActorTimerTask::new(
                delay,
                strong_actor_client.weak(),
                TimerTick::LeaseHeartbeat { generation },
                mock_clock.clone(),
            );
            join_handles.push(tokio::task::spawn(task.run()));

            // -- execute --
            drop(handle);
        }

        // -- verify --
        // The clock never moves, so only cancellation can end these tasks.
        for join_handle in join_handles {
            tokio::time::timeout(Duration::from_millis(500), join_handle)
                .await
                .expect("timer task outlived its handle")
                .unwrap();
        }
        actor.assert_no_event().await;
    }
}
