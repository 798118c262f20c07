//! Timestamps for message rows: compact age for recent messages, the
//! calendar date once a thread scrolls back more than a week.

use chrono::{DateTime, Utc};

pub fn format_relative_date(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(timestamp);
    if age.num_seconds() < 0 {
        // Server clock ahead of ours: fall back to the wall-clock time.
        return timestamp.format("%H:%M").to_string();
    }
    if age.num_seconds() < 60 {
        return "just now".to_string();
    }
    if age.num_minutes() < 60 {
        return format!("{}m", age.num_minutes());
    }
    if age.num_hours() < 24 {
        return format!("{}h", age.num_hours());
    }
    if age.num_days() < 7 {
        return format!("{}d", age.num_days());
    }
    timestamp.format("%b %-d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 15, 4, 5)
            .single()
            .expect("valid datetime")
    }

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn fresh_messages_read_just_now() {
        let now = test_now();
        assert_eq!(
            format_relative_date(at(2026, 1, 28, 15, 3, 30), now),
            "just now"
        );
    }

    #[test]
    fn recent_ages_stay_compact() {
        let now = test_now();
        assert_eq!(format_relative_date(at(2026, 1, 28, 14, 34, 5), now), "30m");
        assert_eq!(format_relative_date(at(2026, 1, 28, 13, 4, 5), now), "2h");
        assert_eq!(format_relative_date(at(2026, 1, 25, 15, 4, 5), now), "3d");
    }

    #[test]
    fn older_messages_show_the_calendar_date() {
        let now = test_now();
        assert_eq!(format_relative_date(at(2026, 1, 7, 15, 4, 5), now), "Jan 7");
        assert_eq!(
            format_relative_date(at(2025, 12, 24, 9, 0, 0), now),
            "Dec 24"
        );
    }

    #[test]
    fn future_timestamps_fall_back_to_wall_clock_time() {
        let now = test_now();
        assert_eq!(format_relative_date(at(2026, 1, 28, 15, 34, 5), now), "15:34");
    }
}
