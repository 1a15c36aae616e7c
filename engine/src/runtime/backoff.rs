use std::time::Duration;

/// Exponential backoff policy with a bounded maximum.
///
/// The delay for attempt `n` (1-based) is `min(base * 2^(n-1), max)`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the given attempt. Attempt numbers start at 1;
    /// zero is treated as the first attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
        Duration::from_millis(delay_ms).min(self.max)
    }
}
