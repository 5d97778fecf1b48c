use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction for pacing and deadlines at the edges of the
/// stack (poll loop cadence, payout session timeouts).
///
/// The driver itself is advanced by the elapsed deltas carried in change
/// records, never by wall-clock reads.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis() as u64
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FrozenClock(Instant);

    impl Clock for FrozenClock {
        fn now(&self) -> Instant {
            self.0
        }
        fn sleep(&self, _d: Duration) {}
    }

    #[test]
    fn ms_since_saturates_on_future_epoch() {
        let clock = FrozenClock(Instant::now());
        let future = clock.0 + Duration::from_millis(250);
        assert_eq!(clock.ms_since(future), 0);
    }

    #[test]
    fn ms_since_reports_elapsed() {
        let origin = Instant::now();
        let clock = FrozenClock(origin + Duration::from_millis(40));
        assert_eq!(clock.ms_since(origin), 40);
    }
}
