//! Reconnect backoff accounting.
//!
//! [`BackoffPolicy`] is a plain value owned by one session. It never sleeps;
//! the supervisor asks it for the [`NextAttempt`] after every connection cycle
//! and schedules the reconnect itself.
//!
//! Delays grow as `base * 2^attempt` with the exponent capped at
//! `max_exponent`, without jitter: `base, 2·base, 4·base, …, base·2^max`.

use std::time::Duration;

use crate::config::{MAX_INTERVAL_EXPONENT_LIMIT, WatchConfig};

/// How many consecutive failed attempts are tolerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectLimit {
    /// Reconnect forever.
    Unlimited,
    /// Give up after this many consecutive failures. `0` disables reconnects.
    Bounded(u32),
}

impl ReconnectLimit {
    /// Interpret the raw configuration value: negative means unlimited.
    pub fn from_raw(raw: i32) -> Self {
        u32::try_from(raw).map_or(Self::Unlimited, Self::Bounded)
    }
}

/// What the supervisor should do after a connection cycle ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAttempt {
    /// Reconnect after this delay.
    After(Duration),
    /// The attempt limit is used up; stop for good.
    Exhausted {
        /// Consecutive attempts counted when the limit was hit.
        attempts: u32,
    },
}

/// Bounded exponential backoff state for one watch session.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    limit: ReconnectLimit,
    max_exponent: u32,
    attempts: u32,
}

impl BackoffPolicy {
    /// Create a policy with the attempt counter at zero.
    pub fn new(base: Duration, limit: ReconnectLimit, max_exponent: u32) -> Self {
        Self {
            base,
            limit,
            max_exponent: max_exponent.min(MAX_INTERVAL_EXPONENT_LIMIT),
            attempts: 0,
        }
    }

    /// Build from session configuration.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            config.reconnect_interval(),
            config.limit(),
            config.max_interval_exponent,
        )
    }

    /// Forget all failed attempts. Called whenever a response arrives.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another reconnect would exceed the limit.
    pub fn is_exhausted(&self) -> bool {
        match self.limit {
            ReconnectLimit::Unlimited => false,
            ReconnectLimit::Bounded(max) => self.attempts >= max,
        }
    }

    /// Count one more attempt and return the delay before it, or
    /// [`NextAttempt::Exhausted`] once the limit has been reached.
    ///
    /// The exponent is the count *before* this attempt, so the first reconnect
    /// after a reset waits exactly `base`.
    pub fn next_delay(&mut self) -> NextAttempt {
        if self.is_exhausted() {
            return NextAttempt::Exhausted {
                attempts: self.attempts,
            };
        }
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        NextAttempt::After(delay)
    }

    /// Upper bound on any delay this policy hands out.
    pub fn max_delay(&self) -> Duration {
        self.delay_for(self.max_exponent)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        self.base.saturating_mul(1u32 << exponent)
    }
}
