//! Exponential backoff schedule for reconnection delays.
//!
//! The schedule itself is stateless: the current delay for each stream lives
//! in its health record, so snapshots always show the real backoff. Jitter is
//! applied only to the slept duration, never to the recorded one, which keeps
//! the recorded backoff monotonic between successes.

use std::time::Duration;

use rand::Rng;

/// Stateless exponential backoff: `next = min(current * multiplier, ceiling)`.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    floor: Duration,
    ceiling: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl BackoffSchedule {
    /// Create a schedule. The ceiling is raised to the floor if below it,
    /// the multiplier is clamped to at least 1.0 and the jitter factor
    /// to [0.0, 1.0).
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration, multiplier: f64, jitter_factor: f64) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            multiplier: multiplier.max(1.0),
            jitter_factor: jitter_factor.clamp(0.0, 0.999),
        }
    }

    /// First delay after a disconnect (and after every success reset).
    #[must_use]
    pub const fn floor(&self) -> Duration {
        self.floor
    }

    /// Upper bound on the delay.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Delay to record after a failed attempt at `current`.
    ///
    /// Non-decreasing for any `current >= floor` since the multiplier is
    /// at least 1.0.
    #[must_use]
    pub fn next(&self, current: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (current.as_millis() as f64 * self.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.ceiling.as_millis());
        let capped_u64 = u64::try_from(capped).unwrap_or(u64::MAX);
        Duration::from_millis(capped_u64).max(self.floor)
    }

    /// Randomize a delay by up to `jitter_factor` in either direction.
    ///
    /// Used for the actual sleep; the recorded delay is left untouched.
    #[must_use]
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
