// SPDX-License-Identifier: MIT
// Copyright (C) 2024 LibreRTOS Project

//! Tick arithmetic for LibreRTOS
//!
//! The system tick counter is 32 bits wide and wraps silently. Uptime is
//! derived from it and is 32 bits too, so it wraps at 2^32 ms or when the
//! tick counter wraps, whichever comes first. Only at 1000 Hz do the two
//! coincide. Neither wrap is treated as an error.

/// System tick counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(u32);

impl Ticks {
    /// Zero ticks
    pub const ZERO: Self = Self(0);

    /// Create from raw tick count
    #[must_use]
    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Get the raw tick count
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Advance by one tick, wrapping at `u32::MAX`
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Ticks elapsed since `earlier`, correct across a single wrap
    #[must_use]
    pub const fn since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Convert to milliseconds at the given tick rate
    ///
    /// Returns 0 for a zero tick rate.
    #[must_use]
    pub const fn as_millis(self, tick_rate_hz: u32) -> u32 {
        uptime_ms(self.0, tick_rate_hz)
    }
}

impl From<u32> for Ticks {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Ticks> for u32 {
    fn from(value: Ticks) -> Self {
        value.0
    }
}

/// Milliseconds represented by `ticks` at `tick_rate_hz`
///
/// Computed in 64 bits and truncated to 32, so the result wraps at
/// 2^32 ms instead of overflowing. Below 1000 Hz that happens before
/// `ticks` itself wraps. A zero tick rate yields 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn uptime_ms(ticks: u32, tick_rate_hz: u32) -> u32 {
    if tick_rate_hz == 0 {
        return 0;
    }
    ((ticks as u64 * 1000) / tick_rate_hz as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_at_1khz_is_tick_count() {
        assert_eq!(uptime_ms(0, 1000), 0);
        assert_eq!(uptime_ms(1234, 1000), 1234);
    }

    #[test]
    fn test_uptime_at_100hz() {
        assert_eq!(uptime_ms(5, 100), 50);
        assert_eq!(uptime_ms(u32::MAX, 100), (u32::MAX as u64 * 10) as u32);
    }

    #[test]
    fn test_uptime_wraps_before_counter_below_1khz() {
        // 429_496_730 ticks at 100 Hz is 2^32 + 4 ms
        assert_eq!(uptime_ms(429_496_730, 100), 4);
    }

    #[test]
    fn test_uptime_wraps_with_counter_above_1khz() {
        let last = Ticks::new(u32::MAX);
        assert_eq!(last.as_millis(4000), 1_073_741_823);
        assert_eq!(last.next().as_millis(4000), 0);
    }

    #[test]
    fn test_zero_rate() {
        assert_eq!(uptime_ms(100, 0), 0);
    }

    #[test]
    fn test_tick_wraps() {
        let t = Ticks::new(u32::MAX).next();
        assert_eq!(t, Ticks::ZERO);
        assert_eq!(t.as_millis(1000), 0);
    }

    #[test]
    fn test_since_across_wrap() {
        let before = Ticks::new(u32::MAX - 1);
        let after = before.next().next().next();
        assert_eq!(after.since(before), 3);
    }
}
