use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct PaxosOptions {
    /// How long acceptors stay loyal to the last leader that acted, ignoring rival Collects.
    pub leader_lease: Option<Duration>,
    /// How long a lagging replica waits for a recovery window to fill before asking again.
    pub recovery_grace_period: Option<Duration>,
    pub leader_interaction_timeout: Option<Duration>,
    /// Attempts per leader phase before giving up with VOTE_TIMEOUT.
    pub leader_max_tries: Option<u32>,
    pub unresponsiveness_threshold: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
}

pub(super) struct PaxosOptionsValidated {
    pub leader_lease: Duration,
    pub recovery_grace_period: Duration,
    pub leader_interaction_timeout: Duration,
    pub leader_max_tries: u32,
    pub unresponsiveness_threshold: Duration,
    pub heartbeat_interval: Duration,
}

impl PaxosOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval.is_zero() {
            return Err("Heartbeat interval must be non-zero");
        }
        // The detector scans five times per threshold.
        if (self.unresponsiveness_threshold / 5).is_zero() {
            return Err("Unresponsiveness threshold is too small to scan");
        }
        if self.leader_interaction_timeout.is_zero() || self.recovery_grace_period.is_zero() {
            return Err("Leader interaction timeout and recovery grace period must be non-zero");
        }
        if self.heartbeat_interval >= self.unresponsiveness_threshold {
            return Err("Unresponsiveness threshold must be greater than the heartbeat interval");
        }
        if self.leader_interaction_timeout >= self.leader_lease {
            return Err("Leader interaction timeout must be less than the leader lease");
        }
        if self.leader_max_tries == 0 {
            return Err("Leader must be allowed at least one try");
        }

        Ok(())
    }
}

impl TryFrom<PaxosOptions> for PaxosOptionsValidated {
    type Error = &'static str;

    fn try_from(options: PaxosOptions) -> Result<Self, Self::Error> {
        let values = PaxosOptionsValidated {
            leader_lease: options.leader_lease.unwrap_or(Duration::from_secs(30)),
            recovery_grace_period: options.recovery_grace_period.unwrap_or(Duration::from_secs(30)),
            leader_interaction_timeout: options.leader_interaction_timeout.unwrap_or(Duration::from_secs(1)),
            leader_max_tries: options.leader_max_tries.unwrap_or(3),
            unresponsiveness_threshold: options.unresponsiveness_threshold.unwrap_or(Duration::from_secs(5)),
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_secs(1)),
        };

        values.validate()?;
        Ok(values)
    }
}
