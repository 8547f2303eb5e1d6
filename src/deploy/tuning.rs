// ABOUTME: Cadence and budget knobs for a deployment machine.
// ABOUTME: Wait durations, poll jitter, capacity cap, and step retry budgets.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

use crate::machine::RetryPolicy;

/// Tunable parameters for one deployment machine.
///
/// Poll cadence is configuration, not constants: a ten-instance fleet and a
/// five-hundred-instance fleet want very different check rhythms.
#[derive(Debug, Clone, Deserialize)]
pub struct Tuning {
    /// One-time pause after the fleet mutation, before the first health poll.
    #[serde(default = "default_wait_for_deploy", with = "humantime_serde")]
    pub wait_for_deploy: Duration,

    /// Pause between health poll cycles.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum uniformly-random addition to each poll pause, to keep many
    /// concurrent executions from querying in lockstep.
    #[serde(default = "default_poll_jitter", with = "humantime_serde")]
    pub poll_jitter: Duration,

    /// Upper bound on any service's desired capacity.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,

    #[serde(default)]
    pub retry: RetryTuning,
}

/// Retry budget applied to the steps that call flaky external APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryTuning {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

impl RetryTuning {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            wait_for_deploy: default_wait_for_deploy(),
            poll_interval: default_poll_interval(),
            poll_jitter: default_poll_jitter(),
            max_capacity: default_max_capacity(),
            retry: RetryTuning::default(),
        }
    }
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay: default_retry_base_delay(),
            max_delay: default_retry_max_delay(),
        }
    }
}

/// A poll pause with its random jitter applied.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

fn default_wait_for_deploy() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_poll_jitter() -> Duration {
    Duration::from_secs(2)
}

fn default_max_capacity() -> u32 {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}
