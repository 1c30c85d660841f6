//! Bounded polling policy shared by the health gate and connectivity checks.
//!
//! A [`RetryPolicy`] describes *when* to try again (interval, growth factor, jitter)
//! and *for how long* (`max_duration`). It never retries forever: every loop built on
//! it has a deadline.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Randomization applied to each polling delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Exact delays.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2 + uniform[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=ms - half))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub interval: Duration,
    /// Total time budget, measured from the first attempt.
    pub max_duration: Duration,
    /// Multiplicative growth of the interval (`1.0` keeps it fixed).
    pub factor: f64,
    /// Cap for a single delay.
    pub max_interval: Duration,
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// Fixed-interval polling bounded by `max_duration`.
    pub fn fixed(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
            factor: 1.0,
            max_interval: interval,
            jitter: JitterPolicy::None,
        }
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.factor = factor;
        self.max_interval = max_interval.max(self.interval);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed).
    ///
    /// The base is `interval × factor^attempt` clamped to `max_interval`; jitter is
    /// applied to the clamped base and never fed back into later attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.max_interval.max(self.interval);
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.interval.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }

    /// Start a deadline-tracked schedule.
    pub fn start(&self) -> RetrySchedule {
        RetrySchedule {
            policy: *self,
            deadline: Instant::now() + self.max_duration,
            attempt: 0,
        }
    }
}

/// A running schedule: counts attempts and knows how much time is left.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    deadline: Instant,
    attempt: u32,
}

impl RetrySchedule {
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Record an attempt and return how long to sleep before the next one,
    /// or `None` when the budget is spent. The delay never overshoots the deadline.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.is_expired() {
            None
        } else {
            Some(delay.min(self.remaining()))
        }
    }
}
