mod actor_timer;
mod time;

#[cfg(test)]
pub(crate) mod test_utils;

pub(crate) use actor_timer::ActorTimerHandle;
