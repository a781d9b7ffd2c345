use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngExt;

/// Retry schedule for failed deliveries.
///
/// `delay(attempt) = min(base_delay * 2^attempt, max_delay)`. With `jitter`
/// enabled the delay is drawn uniformly from `[delay / 2, delay]` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts after which an event is given up on.
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15 * 60),
            max_attempts: 10,
            jitter: false,
        }
    }
}

/// What to do with an event whose delivery just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `PENDING`, claimable again at `next_attempt_at`.
    Retry {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Move to `FAILED`.
    Exhausted { attempts: u32 },
}

impl BackoffPolicy {
    /// Deterministic delay before retry number `attempt`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let upper = delay.as_millis() as u64;
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(upper / 2..=upper))
    }

    /// Decide the transition after a failed attempt.
    ///
    /// `attempts` is the count before this failure and `previous` the event's
    /// current `next_attempt_at`; a retry time never moves backwards.
    pub fn decide(
        &self,
        attempts: u32,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let attempts = attempts.saturating_add(1);
        if attempts >= self.max_attempts {
            return RetryDecision::Exhausted { attempts };
        }
        let delay = chrono::Duration::from_std(self.jittered(self.delay(attempts)))
            .unwrap_or(chrono::Duration::MAX);
        let next = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let floor = previous
            .checked_add_signed(chrono::Duration::milliseconds(1))
            .unwrap_or(previous);
        RetryDecision::Retry {
            attempts,
            next_attempt_at: next.max(floor),
        }
    }
}
