//! Bounded exponential backoff between delivery attempts

use std::time::Duration;

/// Default first retry delay in seconds
pub const DEFAULT_RETRY_BASE_SECS: u64 = 15;

/// Default longest retry delay in seconds
pub const DEFAULT_RETRY_MAX_SECS: u64 = 480;

/// Delay sequence `base, 2*base, 4*base, ...` capped at `ceiling`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// A zero `base` is raised to one millisecond so the delay can still grow.
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let ceiling = ceiling.max(base);
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Start over from `base` after a success
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_RETRY_BASE_SECS),
            Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
        )
    }
}
