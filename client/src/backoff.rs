//! Capped exponential backoff for failed ledger calls.

use rand::{Rng, RngCore};
use std::time::Duration;

/// Retry delay that doubles after every failure, up to `max`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Back to the initial delay after a success.
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay before the next retry, drawn from `[current/2, current]`.
    pub(crate) fn next_delay(&mut self, rng: &mut impl RngCore) -> Duration {
        let base = self.current;
        self.current = base.saturating_mul(2).min(self.max);
        let half = base / 2;
        if half.is_zero() {
            return base;
        }
        half + rng.gen_range(Duration::ZERO..=half)
    }
}
