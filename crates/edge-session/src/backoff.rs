//! Exponential retry delays with optional jitter.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Delay before retry number `attempt` (1-based).
///
/// `jitter_unit` is a uniform sample in `[0, 1)`; it scales the delay into
/// `[0.5, 1.0]` of its nominal value and is ignored when jitter is off.
pub fn delay_for_attempt(config: &BackoffConfig, attempt: u32, jitter_unit: f64) -> Duration {
    if config.initial_delay_ms == 0 {
        return Duration::ZERO;
    }
    let multiplier = config.multiplier.max(1.0);
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let scaled_ms = config.initial_delay_ms as f64 * multiplier.powi(exponent);

    let nominal = if config.max_delay_ms > 0 && scaled_ms >= config.max_delay_ms as f64 {
        Duration::from_millis(config.max_delay_ms)
    } else {
        nanos_to_duration(scaled_ms * 1e6)
    };
    if !config.jitter {
        return nominal;
    }
    let factor = 0.5 + 0.5 * jitter_unit.clamp(0.0, 1.0);
    nanos_to_duration(nominal.as_nanos() as f64 * factor)
}

// Float-to-int `as` casts saturate, so overflow lands on u64::MAX nanos.
fn nanos_to_duration(nanos: f64) -> Duration {
    if nanos.is_nan() || nanos <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(nanos.round() as u64)
}

/// Stateful attempt counter over [`delay_for_attempt`].
#[derive(Debug)]
pub struct Backoff<R = StdRng> {
    config: BackoffConfig,
    attempt: u32,
    rng: R,
}

impl Backoff<StdRng> {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }
}

impl<R: Rng> Backoff<R> {
    pub fn with_rng(config: BackoffConfig, rng: R) -> Self {
        Self {
            config,
            attempt: 0,
            rng,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.delay_for(self.attempt)
    }

    /// Delay for an explicit attempt number, without advancing the counter.
    pub fn delay_for(&mut self, attempt: u32) -> Duration {
        let unit = if self.config.jitter {
            self.rng.random::<f64>()
        } else {
            0.0
        };
        delay_for_attempt(&self.config, attempt, unit)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
