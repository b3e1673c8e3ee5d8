//! Backoff for the second-bucket try-lock protocol.
//!
//! When a reach must hold two buckets it takes the second one with a
//! try-lock. On failure it drops everything and restarts after a pause that
//! grows with the number of failed attempts: a short busy-spin, then
//! cooperative yields, then sleeps scaled by the attempt number.

use std::cmp;
use std::thread;
use std::time::Duration;

use strata_common::constants::MAX_BACKOFF_SLEEP;
use tracing::warn;

use super::config::BufferPoolConfig;

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    attempt: u32,
    spin_attempts: u32,
    yield_attempts: u32,
    sleep_unit: Duration,
}

impl Backoff {
    pub fn new(config: &BufferPoolConfig) -> Self {
        Self {
            attempt: 0,
            spin_attempts: config.spin_attempts,
            yield_attempts: config.yield_attempts,
            sleep_unit: config.backoff_sleep,
        }
    }

    /// Returns the number of pauses taken so far.
    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Pauses before the next attempt.
    pub fn snooze(&mut self) {
        self.attempt = self.attempt.saturating_add(1);

        if self.attempt <= self.spin_attempts {
            for _ in 0..(1u32 << cmp::min(self.attempt, 6)) {
                std::hint::spin_loop();
            }
        } else if self.attempt <= self.spin_attempts.saturating_add(self.yield_attempts) {
            thread::yield_now();
        } else {
            let sleeps = self.attempt - self.spin_attempts - self.yield_attempts;
            if sleeps == 1 {
                warn!(attempt = self.attempt, "bucket lock still contended, backing off");
            }
            thread::sleep(self.sleep_duration(sleeps));
        }
    }

    fn sleep_duration(&self, sleeps: u32) -> Duration {
        cmp::min(self.sleep_unit.saturating_mul(sleeps), MAX_BACKOFF_SLEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(spins: u32, yields: u32, unit_us: u64) -> Backoff {
        let config = BufferPoolConfig::new(4).with_backoff(spins, yields, Duration::from_micros(unit_us));
        Backoff::new(&config)
    }

    #[test]
    fn test_attempts_counted() {
        let mut b = backoff(2, 2, 1);
        for _ in 0..5 {
            b.snooze();
        }
        assert_eq!(b.attempts(), 5);
    }

    #[test]
    fn test_sleep_scales_and_caps() {
        let b = backoff(0, 0, 100);
        assert_eq!(b.sleep_duration(1), Duration::from_micros(100));
        assert_eq!(b.sleep_duration(3), Duration::from_micros(300));
        assert_eq!(b.sleep_duration(1_000_000), MAX_BACKOFF_SLEEP);
    }
}
