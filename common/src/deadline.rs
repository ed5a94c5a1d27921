//! Wall-clock bounded polling shared by the link wait and the fetch retry.

use std::{
    thread,
    time::{Duration, Instant},
};

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

/// Monotonic milliseconds since construction; sleeps block the thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub elapsed_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start_ms: u64,
    budget_ms: u64,
}

impl Deadline {
    pub fn start(clock: &dyn Clock, budget: Duration) -> Self {
        Self {
            start_ms: clock.now_ms(),
            budget_ms: budget.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn elapsed_ms(&self, clock: &dyn Clock) -> u64 {
        clock.now_ms().saturating_sub(self.start_ms)
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        Duration::from_millis(self.budget_ms.saturating_sub(self.elapsed_ms(clock)))
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.elapsed_ms(clock) >= self.budget_ms
    }
}

/// Calls `attempt` with the remaining budget until it yields a value or the
/// budget is spent. The first attempt always runs. Sleeps never extend past
/// the deadline.
pub fn poll_until<T>(
    clock: &dyn Clock,
    budget: Duration,
    interval: Duration,
    mut attempt: impl FnMut(Duration) -> Option<T>,
) -> Result<T, TimedOut> {
    let deadline = Deadline::start(clock, budget);
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        if let Some(value) = attempt(deadline.remaining(clock)) {
            return Ok(value);
        }

        if deadline.is_expired(clock) {
            break;
        }

        let pause = interval.min(deadline.remaining(clock));
        if !pause.is_zero() {
            clock.sleep(pause);
        }

        if deadline.is_expired(clock) {
            break;
        }
    }

    Err(TimedOut {
        elapsed_ms: deadline.elapsed_ms(clock),
        attempts,
    })
}
