//! Exponential backoff for database reconnection

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Delay schedule: `initial * multiplier^attempt`, capped at `max_delay`,
/// plus up to `jitter` of the capped delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Total tries including the first one
    pub max_attempts: u32,
    /// Additive jitter fraction (0.0 to 0.5)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.5);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(30) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `attempt` with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let range = (base.as_millis() as f64 * self.jitter) as u64;
        if range == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=range))
    }

    /// Upper bound of all sleeps a full retry cycle can take
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| {
                let base = self.base_delay(attempt);
                base + Duration::from_millis((base.as_millis() as f64 * self.jitter) as u64)
            })
            .sum()
    }
}

/// Stateful attempt counter over a `BackoffPolicy`
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempt: AtomicU32,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: AtomicU32::new(0),
        }
    }

    /// Next delay, or `None` once the policy allows no more retries
    pub fn next_delay(&self) -> Option<Duration> {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        if attempt + 1 >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay(attempt))
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_schedule_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_is_additive_and_bounded() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
        assert_eq!(policy.with_jitter(0.0).delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_attempts_run_out() {
        let backoff = ExponentialBackoff::new(BackoffPolicy::default().with_jitter(0.0));
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_max_total_delay_covers_every_sleep() {
        let policy = BackoffPolicy::default();
        // 100 + 200 + 400 + 800, each with 25% jitter headroom
        assert_eq!(policy.max_total_delay(), Duration::from_millis(1875));
    }
}
