//! Reconnect delay policy.

use std::time::Duration;

/// Exponential reconnect delay bounded by a ceiling.
///
/// `next_delay` hands out the delay to sleep now and then grows the stored
/// value: `cur = min(max, max(cur * factor, base))`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: f64,
    factor: f64,
    ceiling: f64,
    current: f64,
}

impl Backoff {
    /// All values in seconds. `base` is floored at 1s and `factor` at 1.0.
    pub fn new(base: f64, factor: f64, ceiling: f64) -> Self {
        let base = sanitize(base, 1.0).max(1.0);
        let factor = sanitize(factor, 2.0).max(1.0);
        let ceiling = sanitize(ceiling, 300.0).max(base);
        Self {
            base,
            factor,
            ceiling,
            current: base,
        }
    }

    /// Delay for the current failure; advances the state for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let sleep = self.current.min(self.ceiling);
        self.current = (self.current * self.factor).max(self.base).min(self.ceiling);
        Duration::from_secs_f64(sleep)
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.current)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.ceiling)
    }
}

fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}
