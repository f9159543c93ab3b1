//! Retry Pacing
//!
//! Exponential backoff with jitter for lifecycle re-evaluation. The session
//! driver asks for a delay each time a session ends without reaching the
//! open phase, and resets the policy once a channel opens.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = +/-10%).
    pub jitter_factor: f64,
    /// Retries allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&WebSocketSettings::default())
    }
}

impl RetryConfig {
    /// Build from the WebSocket settings, with 10% jitter.
    #[must_use]
    pub fn from_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.retry_delay_initial,
            max_delay: settings.retry_delay_max,
            multiplier: settings.retry_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_retry_attempts,
        }
    }
}

/// Stateful backoff sequence.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    next_base: Duration,
    attempts: u32,
}

impl RetryPolicy {
    /// Start a fresh sequence.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let next_base = config.initial_delay;
        Self {
            config,
            next_base,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once the attempt budget is
    /// spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;

        let base = self.next_base.min(self.config.max_delay);
        self.next_base = grow(base, self.config.multiplier).min(self.config.max_delay);

        Some(jitter(base, self.config.jitter_factor))
    }

    /// Start over after a successful open.
    pub const fn reset(&mut self) {
        self.next_base = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Retries handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn grow(delay: Duration, multiplier: f64) -> Duration {
    // Delays never shrink.
    let multiplier = if multiplier.is_finite() {
        multiplier.max(1.0)
    } else {
        1.0
    };
    let scaled = delay.as_millis() as f64 * multiplier;
    Duration::from_millis(scaled.min(u64::MAX as f64) as u64)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let millis = delay.as_millis() as f64;
    let spread = millis * factor;
    let offset: f64 = rand::rng().random_range(-spread..=spread);
    Duration::from_millis((millis + offset).max(1.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let mut policy = RetryPolicy::new(config(0));
        let delays: Vec<u128> = (0..6)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn budget_is_enforced_and_reset_restores_it() {
        let mut policy = RetryPolicy::new(config(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.exhausted());
        assert!(policy.next_delay().is_none());

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn shrinking_multiplier_holds_the_initial_delay() {
        for multiplier in [0.0, -2.0, 0.5, f64::NAN] {
            let mut policy = RetryPolicy::new(RetryConfig {
                multiplier,
                ..config(0)
            });
            let delays: Vec<u128> = (0..3)
                .map(|_| policy.next_delay().unwrap().as_millis())
                .collect();
            assert_eq!(delays, vec![100, 100, 100], "{multiplier}");
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut policy = RetryPolicy::new(RetryConfig {
            jitter_factor: 0.1,
            ..config(0)
        });
        let first = policy.next_delay().unwrap().as_millis();
        assert!((90..=110).contains(&first), "{first}");
    }

    #[test]
    fn defaults_follow_settings() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 0);
    }
}
