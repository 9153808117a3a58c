//! Reconnect backoff: `min(base * 2^retries, ceiling)`.
//!
//! The retry counter is reset when a connection opens and incremented on
//! every close. There is no retry limit.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_BASE: Duration = Duration::from_millis(1_000);

/// Upper bound on any reconnect delay.
pub const DEFAULT_CEILING: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            retries: 0,
        }
    }

    /// Delay used after `retries` previous closes.
    pub fn delay_for(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    /// Delay for the next attempt; bumps the retry counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.retries);
        self.retries = self.retries.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_nth_attempt_delay() {
        let mut backoff = Backoff::default();
        let delays: Vec<Duration> = (1..=20).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], ms(1_000)); // attempt 1
        assert_eq!(delays[1], ms(2_000));
        assert_eq!(delays[4], ms(16_000));
        assert_eq!(delays[5], ms(30_000)); // attempt 6 hits the ceiling
        assert_eq!(delays[19], ms(30_000)); // attempt 20
        assert_eq!(backoff.retries(), 20);
    }

    #[test]
    fn test_reset_on_open() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.retries(), 0);
        assert_eq!(backoff.next_delay(), ms(1_000));
    }

    #[test]
    fn test_huge_retry_count_saturates() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(31), ms(30_000));
        assert_eq!(backoff.delay_for(64), ms(30_000));
        assert_eq!(backoff.delay_for(u32::MAX), ms(30_000));
    }

    #[test]
    fn test_custom_base() {
        let mut backoff = Backoff::new(ms(10), ms(45));
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), ms(20));
        assert_eq!(backoff.next_delay(), ms(40));
        assert_eq!(backoff.next_delay(), ms(45));
    }
}
