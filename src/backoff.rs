//! Exponential backoff with jitter for the reconnect state. Split into a
//! fixed policy plus mutable attempt-count state, the common shape for
//! reconnecting stream clients.

use std::time::Duration;

use rand::Rng;

/// `backoff = min(base * 2^attempt, max) * (1 ± jitter)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fractional jitter applied symmetrically, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Per-replay mutable backoff state: the current attempt counter.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Resets the attempt counter after a successful (re)connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Computes the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(32);
        let scaled = self.policy.base.as_millis().saturating_mul(1u128 << shift);
        let capped = scaled.min(self.policy.max.as_millis());
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        let jittered = ((capped as f64) * factor).max(0.0) as u128;
        Duration::from_millis(jittered.min(u64::MAX as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_until_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: 0.0,
        };
        let mut backoff = ReconnectBackoff::new(policy);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn delay_never_exceeds_max() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            jitter: 0.0,
        };
        let mut backoff = ReconnectBackoff::new(policy);
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(500));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            jitter: 0.5,
        };
        let mut backoff = ReconnectBackoff::new(policy);
        for _ in 0..20 {
            let d = backoff.next_delay();
            assert!(d <= Duration::from_millis(60_000));
        }
    }

    #[test]
    fn reset_returns_to_base_delay() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(50),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };
        let mut backoff = ReconnectBackoff::new(policy);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
