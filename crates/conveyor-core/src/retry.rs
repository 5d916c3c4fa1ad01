//! Exponential backoff retry waiter (spec §4.4).
//!
//! Pure time policy, no I/O: initial delay 5s, doubling, capped at 1800s,
//! resettable. Used by the client's HTTP retry loop (spec §4.8).

use std::time::Duration;

const DEFAULT_INIT_WAIT_SECS: u64 = 5;
const DEFAULT_MAX_WAIT_SECS: u64 = 1800;

/// An exponential backoff timer. Each call to [`RetryWaiter::next_delay`]
/// returns double the previous delay, up to `max_wait`.
#[derive(Debug, Clone, Copy)]
pub struct RetryWaiter {
    current: Duration,
    init: Duration,
    max: Duration,
}

impl RetryWaiter {
    pub fn new(init: Duration, max: Duration) -> Self {
        Self {
            current: init,
            init,
            max,
        }
    }

    /// Returns the next delay and advances the internal state for the
    /// following call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Sleeps for the next delay (see [`RetryWaiter::next_delay`]).
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }

    /// Restores the initial delay; the next call to `next_delay`/`wait`
    /// blocks for `init` again.
    pub fn reset(&mut self) {
        self.current = self.init;
    }
}

impl Default for RetryWaiter {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_INIT_WAIT_SECS),
            Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_doubles_and_caps() {
        let mut w = RetryWaiter::default();
        let mut seq = Vec::new();
        for _ in 0..10 {
            seq.push(w.next_delay().as_secs());
        }
        assert_eq!(seq, vec![5, 10, 20, 40, 80, 160, 320, 640, 1280, 1800]);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut w = RetryWaiter::default();
        w.next_delay();
        w.next_delay();
        w.reset();
        assert_eq!(w.next_delay().as_secs(), 5);
    }

    #[test]
    fn custom_bounds_are_honored() {
        let mut w = RetryWaiter::new(Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(w.next_delay().as_millis(), 100);
        assert_eq!(w.next_delay().as_millis(), 200);
        assert_eq!(w.next_delay().as_millis(), 300);
        assert_eq!(w.next_delay().as_millis(), 300);
    }
}
