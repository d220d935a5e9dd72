//! Delay schedule for retried queue calls.
//!
//! After a failed receive or delete the worker sleeps
//! [`BackoffConfig::initial_delay`], then multiplies the delay by
//! [`BackoffConfig::multiplier`] for each further consecutive failure, up
//! to [`BackoffConfig::max_delay`]. A successful receive resets it.

use std::time::Duration;

/// Retry delays for queue receive and acknowledge calls.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Sleep after the first failed queue call.
    pub initial_delay: Duration,
    /// Longest sleep between queue calls, however many have failed.
    pub max_delay: Duration,
    /// Growth factor applied after each further failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay to use after `current` has also ended in a failed queue call.
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_failure_waits_twice_as_long() {
        let config = BackoffConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn delay_never_exceeds_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn multiplier_is_configurable() {
        let config = BackoffConfig {
            multiplier: 3.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(2), &config), Duration::from_secs(6));
    }

    #[test]
    fn sustained_outage_settles_at_thirty_seconds() {
        let config = BackoffConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }
}
