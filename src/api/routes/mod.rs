//! API route handlers, organized by resource.

mod config;
mod episodes;
mod feeds;
mod history;
mod progress;
mod system;

pub use config::{get_config, restart, update_config_section, upload_tls};
pub use episodes::{block_episode, delete_episode, list_episodes, retry_episode};
pub use feeds::{create_feed, delete_feed, get_feed, list_feeds, refresh_feed, update_feed};
pub use history::{
    cleanup_history, delete_all_history, delete_history_entry, get_history_entry, history_stats,
    list_history,
};
pub use progress::{get_progress, stream_progress};
pub use system::health;

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};

/// Parse a date query parameter.
///
/// Accepts full ISO-8601 timestamps and bare `YYYY-MM-DD` dates; a bare
/// end date covers the whole day.
pub(crate) fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(naive) = time {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    Err(Error::InvalidInput(format!(
        "invalid date {value:?}; expected ISO-8601 or YYYY-MM-DD"
    )))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_date("2024-06-15T12:30:00Z", false).unwrap();
        assert_eq!(parsed.hour(), 12);
        assert_eq!(parsed.minute(), 30);
    }

    #[test]
    fn parses_bare_dates_at_midnight() {
        let parsed = parse_date("2024-06-15", false).unwrap();
        assert_eq!(parsed.hour(), 0);
        assert_eq!(parsed.minute(), 0);
    }

    #[test]
    fn bare_end_dates_cover_the_whole_day() {
        let parsed = parse_date("2024-06-15", true).unwrap();
        assert_eq!(parsed.hour(), 23);
        assert_eq!(parsed.second(), 59);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_date("yesterday", false).is_err());
        assert!(parse_date("15/06/2024", false).is_err());
    }
}
