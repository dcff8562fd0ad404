//! Frame and millisecond conversions
//!
//! All synthesis arithmetic is done in frames (one frame = one sample per
//! channel). Milliseconds only appear at the edges: user-supplied target and
//! crossfade lengths, and durations reported back.
//!
//! # Rounding
//!
//! Both directions round to the nearest unit. For any sample rate above
//! 1000 Hz a millisecond value survives the round trip unchanged:
//!
//! ```rust
//! use loopcast_common::timing::{frames_to_ms, ms_to_frames};
//!
//! for rate in [8_000, 22_050, 44_100, 48_000] {
//!     let frames = ms_to_frames(1_234_567, rate);
//!     assert_eq!(frames_to_ms(frames, rate), 1_234_567);
//! }
//! ```

/// Milliseconds per second
pub const MS_PER_SECOND: u64 = 1000;

/// Convert a millisecond length to a frame count at `sample_rate`
///
/// Rounds to the nearest frame.
///
/// # Examples
///
/// ```rust
/// use loopcast_common::timing::ms_to_frames;
///
/// assert_eq!(ms_to_frames(1000, 44_100), 44_100);
/// assert_eq!(ms_to_frames(5000, 48_000), 240_000);
/// assert_eq!(ms_to_frames(1, 44_100), 44);
/// ```
///
/// # Panics
///
/// Panics if `sample_rate` is 0. Saturates at `u64::MAX`; use
/// [`checked_ms_to_frames`] for unvalidated input.
pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");
    checked_ms_to_frames(ms, sample_rate).unwrap_or(u64::MAX)
}

/// [`ms_to_frames`], or `None` when the frame count does not fit in `u64`
///
/// ```rust
/// use loopcast_common::timing::checked_ms_to_frames;
///
/// assert_eq!(checked_ms_to_frames(1000, 44_100), Some(44_100));
/// assert_eq!(checked_ms_to_frames(u64::MAX, 44_100), None);
/// ```
pub fn checked_ms_to_frames(ms: u64, sample_rate: u32) -> Option<u64> {
    ms.checked_mul(sample_rate as u64)?
        .checked_add(MS_PER_SECOND / 2)
        .map(|scaled| scaled / MS_PER_SECOND)
}

/// Convert a frame count to milliseconds at `sample_rate`
///
/// Rounds to the nearest millisecond.
///
/// ```rust
/// use loopcast_common::timing::frames_to_ms;
///
/// assert_eq!(frames_to_ms(44_100, 44_100), 1000);
/// assert_eq!(frames_to_ms(44, 44_100), 1);
/// ```
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");
    let rate = sample_rate as u64;
    frames
        .saturating_mul(MS_PER_SECOND)
        .saturating_add(rate / 2)
        / rate
}

/// Convert whole seconds to milliseconds; `None` on overflow
pub fn seconds_to_ms(seconds: u64) -> Option<u64> {
    seconds.checked_mul(MS_PER_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_rates_are_exact() {
        // 48 kHz has a whole number of frames per millisecond
        assert_eq!(ms_to_frames(1, 48_000), 48);
        assert_eq!(ms_to_frames(200_000, 48_000), 9_600_000);
        assert_eq!(frames_to_ms(9_600_000, 48_000), 200_000);
    }

    #[test]
    fn test_roundtrip_common_rates() {
        for rate in [8_000u32, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 96_000] {
            for ms in [0u64, 1, 7, 999, 5_000, 200_000, 3_600_000, 36_000_001] {
                let frames = ms_to_frames(ms, rate);
                assert_eq!(
                    frames_to_ms(frames, rate),
                    ms,
                    "roundtrip failed at {} Hz for {} ms",
                    rate,
                    ms
                );
            }
        }
    }

    #[test]
    fn test_rounding_to_nearest() {
        // 44.1 frames per ms: 1 ms -> 44 frames, 10 ms -> 441 frames
        assert_eq!(ms_to_frames(10, 44_100), 441);
        // 22 frames at 44.1 kHz is 0.4989 ms -> 0 ms
        assert_eq!(frames_to_ms(22, 44_100), 0);
        // 23 frames is 0.5215 ms -> 1 ms
        assert_eq!(frames_to_ms(23, 44_100), 1);
    }

    #[test]
    fn test_checked_conversion_detects_overflow() {
        let max_ms = u64::MAX / 48_000;
        assert_eq!(checked_ms_to_frames(max_ms, 48_000), Some(ms_to_frames(max_ms, 48_000)));
        assert_eq!(checked_ms_to_frames(max_ms + 1, 48_000), None);
        assert_eq!(checked_ms_to_frames(i64::MAX as u64, 44_100), None);
    }

    #[test]
    fn test_seconds_to_ms_rejects_overflow() {
        assert_eq!(seconds_to_ms(3600), Some(3_600_000));
        assert_eq!(seconds_to_ms(u64::MAX), None);
    }

    #[test]
    #[should_panic(expected = "sample_rate must be > 0")]
    fn test_zero_rate_panics() {
        ms_to_frames(10, 0);
    }
}
