//! Common time/tick helpers for hopper_core.

use hopper_traits::TICKS_PER_MS;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Convert a 100 ns tick delta to whole milliseconds.
/// - Truncates sub-millisecond remainders.
/// - Clamps negative deltas (which a sane transport never produces) to 0.
#[inline]
pub fn ticks_to_ms(ticks: i64) -> i64 {
    (ticks / TICKS_PER_MS).max(0)
}

/// Convert milliseconds to 100 ns ticks, saturating on overflow.
#[inline]
pub fn ms_to_ticks(ms: i64) -> i64 {
    ms.saturating_mul(TICKS_PER_MS)
}

#[cfg(test)]
mod tests {
    use super::{ms_to_ticks, ticks_to_ms};

    #[test]
    fn ticks_round_trip_whole_milliseconds() {
        assert_eq!(ticks_to_ms(ms_to_ticks(37)), 37);
        assert_eq!(ticks_to_ms(0), 0);
    }

    #[test]
    fn sub_millisecond_ticks_truncate() {
        assert_eq!(ticks_to_ms(9_999), 0);
        assert_eq!(ticks_to_ms(19_999), 1);
    }

    #[test]
    fn negative_ticks_clamp_to_zero() {
        assert_eq!(ticks_to_ms(-10_000), 0);
        assert_eq!(ticks_to_ms(i64::MIN), 0);
    }

    #[test]
    fn ms_to_ticks_saturates() {
        assert_eq!(ms_to_ticks(i64::MAX), i64::MAX);
    }
}
