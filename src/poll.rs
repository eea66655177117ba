use std::time::Duration;

/// Bounded polling schedule for readiness checks.
///
/// Hands out a fixed delay before each attempt and stops after
/// `max_attempts`, so a caller looping on `next_delay()` can never
/// wait forever.
pub struct PollSchedule {
    interval: Duration,
    max_attempts: u32,
    /// Number of attempts handed out so far.
    pub attempt: u32,
}

impl PollSchedule {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            attempt: 0,
        }
    }

    /// Returns the delay to wait before the next attempt, or `None`
    /// once every attempt has been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.interval)
    }

    /// Returns true once `max_attempts` attempts have been handed out.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on the total time spent sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}
