//! Bounded backoff for the initiator's connect retries

use std::time::Duration;

use crate::config::RetryConfig;

/// Per-connection-attempt retry state
///
/// The delay grows by a multiplicative factor per failed attempt, capped at
/// the configured maximum. One instance lives per discovered address, so
/// every address starts over at the base delay.
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl RetryState {
    /// Create retry state at the base delay
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            attempt: 0,
            delay: config.base_delay(),
        }
    }

    /// Attempts made since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and return the delay to wait before the next
    ///
    /// Returns `None` once the attempt cap is reached; the caller stops
    /// retrying this address and control returns to discovery.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay().as_secs_f64()),
        );
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig::default();
        let mut retry = RetryState::new(&config);

        let mut delays = Vec::new();
        while let Some(delay) = retry.next_delay() {
            delays.push(delay.as_secs_f64());
        }

        // delay[0] = 5s, then delay[n+1] = min(delay[n] * 1.5, 30s)
        assert_eq!(delays.len() as u32, config.max_attempts - 1);
        assert_eq!(delays[0], 5.0);
        for pair in delays.windows(2) {
            assert_eq!(pair[1], (pair[0] * 1.5).min(30.0));
        }
        assert_eq!(*delays.last().unwrap(), 30.0);
    }

    #[test]
    fn test_cap_exhausts_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        };
        let mut retry = RetryState::new(&config);
        assert!(retry.next_delay().is_some());
        assert!(retry.next_delay().is_some());
        assert!(retry.next_delay().is_none());
        assert_eq!(retry.attempt(), 3);
    }

    #[test]
    fn test_each_state_starts_at_base() {
        let config = RetryConfig::default();
        let mut first = RetryState::new(&config);
        for _ in 0..4 {
            first.next_delay();
        }
        // A fresh state carries nothing over from an exhausted one
        let mut second = RetryState::new(&config);
        assert_eq!(second.attempt(), 0);
        assert_eq!(second.next_delay(), Some(config.base_delay()));
    }
}
