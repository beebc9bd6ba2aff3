//! Reconnect schedule for recoverable disconnects.

use std::time::Duration;

use wg_domain::config::ReconnectConfig;

/// Controls how a session is reopened after a recoverable disconnect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reopen attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures before giving up.  `0` means unlimited.
    pub max_attempts: u32,
    /// Spread delays by up to 25% so many sessions dropped by the same
    /// outage do not reopen in lockstep.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    /// A fixed schedule keeps exact delays; jitter only applies once the
    /// delay actually grows.
    pub fn from_config(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.initial_delay_ms)),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_attempts: cfg.max_attempts,
            jitter: cfg.backoff_factor > 1.0,
        }
    }

    /// A fixed delay, retried forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            max_attempts: 0,
            jitter: false,
        }
    }

    /// Delay before attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            capped_ms * 0.25 * pseudo_random_fraction(attempt)
        } else {
            0.0
        };
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fixed_five_seconds_forever() {
        let p = ReconnectPolicy::default();
        for attempt in [0, 1, 7, 100] {
            assert_eq!(p.delay_for_attempt(attempt), Duration::from_secs(5));
        }
        assert!(!p.should_give_up(1_000_000));
    }

    #[test]
    fn exponential_grows_and_caps() {
        let p = ReconnectPolicy::from_config(&ReconnectConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_attempts: 0,
        });
        assert!(p.delay_for_attempt(1) > p.delay_for_attempt(0));
        assert!(p.delay_for_attempt(2) > p.delay_for_attempt(1));
        assert!(p.delay_for_attempt(20) <= Duration::from_millis(37_500));
    }

    #[test]
    fn bounded_policy_gives_up() {
        let p = ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        };
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
    }

    #[test]
    fn max_below_initial_is_raised() {
        let p = ReconnectPolicy::from_config(&ReconnectConfig {
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            backoff_factor: 1.0,
            max_attempts: 0,
        });
        assert_eq!(p.delay_for_attempt(3), Duration::from_secs(5));
    }
}
