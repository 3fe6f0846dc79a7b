//! Reconnect delay schedule.

use std::time::Duration;

use droidclaw_types::ReconnectConfig;
use rand::Rng;

/// Doublings beyond this cannot matter for any sane cap.
const MAX_EXPONENT: u32 = 20;

/// Bounded exponential backoff with multiplicative jitter.
///
/// The base delay for attempt `n` is `min(max, initial * 2^n)`; the returned
/// delay is the base scaled by a uniform factor in `[1 - jitter, 1 + jitter]`
/// and capped at `max` again.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next reconnect attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max)
    }

    /// Start over after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
