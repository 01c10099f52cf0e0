//! Timestamp and position helpers

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Convert a duration to whole milliseconds, saturating at `u64::MAX`
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Render a playback position as `m:ss` (or `h:mm:ss` past one hour)
///
/// Used in notices such as "Resume from 1:30?".
pub fn format_position(position_ms: u64) -> String {
    let total_secs = position_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        // After 2000-01-01 and before 2100-01-01
        assert!(timestamp.timestamp() > 946_684_800);
        assert!(timestamp.timestamp() < 4_102_444_800);
    }

    #[test]
    fn test_millis_round_trip() {
        assert_eq!(millis_to_duration(1500), Duration::from_millis(1500));
        assert_eq!(duration_to_millis(Duration::from_secs(3)), 3000);
    }

    #[test]
    fn test_duration_to_millis_saturates() {
        assert_eq!(duration_to_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_format_position_minutes() {
        assert_eq!(format_position(0), "0:00");
        assert_eq!(format_position(90_000), "1:30");
        assert_eq!(format_position(599_999), "9:59");
    }

    #[test]
    fn test_format_position_hours() {
        assert_eq!(format_position(3_723_000), "1:02:03");
    }
}
