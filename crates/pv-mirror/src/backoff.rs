//! Exponential backoff for dialing the command link

use std::time::Duration;

use pv_core::config::BackoffConfig;

/// Exponential backoff with jitter and an optional attempt limit
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    /// Attempts allowed in total, `None` for unlimited
    max_attempts: Option<u32>,
    /// Attempts made so far
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            current: config.initial,
            max: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }

    /// Record one failed attempt and get the delay before the next one
    ///
    /// Returns `None` once the attempt limit is used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }

        let delay = self.current;

        // Out-of-range products saturate at the cap
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::try_from_secs_f64(next).map_or(self.max, |d| d.min(self.max));

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        let jitter = Duration::try_from_secs_f64(jitter_amount).unwrap_or(Duration::MAX);
        Some(delay.saturating_add(jitter))
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
