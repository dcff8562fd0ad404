//! Human-readable duration formatting for log output
//!
//! Format is selected by magnitude:
//! - Short (`X.XXs`): below 100 seconds
//! - Medium (`M:SS.Xs`): below 100 minutes
//! - Long (`H:MM:SS`): everything else

const SHORT_FORMAT_MAX_MS: u64 = 100_000;
const MEDIUM_FORMAT_MAX_MS: u64 = 6_000_000;

/// Format a millisecond duration for humans
///
/// # Examples
///
/// ```
/// use loopcast_common::human_time::format_duration_ms;
///
/// assert_eq!(format_duration_ms(5_000), "5.00s");
/// assert_eq!(format_duration_ms(200_000), "3:20.0s");
/// assert_eq!(format_duration_ms(3_600_000), "1:00:00");
/// assert_eq!(format_duration_ms(36_061_000), "10:01:01");
/// ```
pub fn format_duration_ms(ms: u64) -> String {
    if ms < SHORT_FORMAT_MAX_MS {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else if ms < MEDIUM_FORMAT_MAX_MS {
        let minutes = ms / 60_000;
        let secs = (ms % 60_000) as f64 / 1000.0;
        format!("{}:{:04.1}s", minutes, secs)
    } else {
        let total_secs = ms / 1000;
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        let secs = total_secs % 60;
        format!("{}:{:02}:{:02}", hours, mins, secs)
    }
}
