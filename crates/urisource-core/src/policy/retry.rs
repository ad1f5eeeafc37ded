//! Retry state machine for a single attempt sequence.

use std::sync::Arc;
use std::time::Duration;

/// What to do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then try again.
    Retry(Duration),
    /// Schedule used up; surface the last failure.
    Exhausted,
}

/// Attempt bookkeeping, discarded once the sequence resolves.
///
/// The schedule is an ordered list of delays; its length is the number of
/// retries allowed after the first attempt.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    schedule: Arc<[Duration]>,
}

impl RetryState {
    pub fn new(schedule: Arc<[Duration]>) -> Self {
        Self {
            attempt: 1,
            schedule,
        }
    }

    /// 1-based number of the attempt currently in progress.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Total attempts the schedule allows.
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.schedule.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    /// Delay that will follow the next failure, if any.
    pub fn next_backoff(&self) -> Option<Duration> {
        self.schedule.get(self.attempt as usize - 1).copied()
    }

    /// Record a transient failure of the current attempt.
    pub fn record_failure(&mut self) -> RetryDecision {
        match self.next_backoff() {
            Some(delay) => {
                self.attempt += 1;
                RetryDecision::Retry(delay)
            }
            None => RetryDecision::Exhausted,
        }
    }
}
