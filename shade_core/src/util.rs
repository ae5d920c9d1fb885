//! Common numeric and time helpers for shade_core.

use shade_traits::RAW_MAX;
use std::time::{Duration, Instant};

/// Round and clamp a floating raw position into `0..=RAW_MAX`.
/// Non-finite values map to 0.
#[inline]
pub fn clamp_raw(x: f64) -> u16 {
    if !x.is_finite() {
        return 0;
    }
    x.round().clamp(0.0, f64::from(RAW_MAX)) as u16
}

/// Seconds elapsed from `from` to `to`, 0.0 when `to` is earlier.
#[inline]
pub fn secs_between(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64()
}

/// Milliseconds from `epoch` to `at`, saturating at 0 and `u64::MAX`.
#[inline]
pub fn ms_from(epoch: Instant, at: Instant) -> u64 {
    u64::try_from(at.saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds of a duration as `u64`, saturating.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
