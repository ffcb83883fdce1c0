//! Schedule time parsing
//!
//! Parses human-readable time expressions from the queue CLI into unix
//! timestamps for `scheduled_at`.

use crate::error::{Result, SlatedError};
use chrono::{DateTime, Duration, Utc};

/// Parse a schedule string into a DateTime
///
/// Supports multiple formats:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next friday 10am"
/// - Absolute times: "2026-09-20 15:00"
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    if input.is_empty() {
        return Err(SlatedError::Validation(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    // Try duration parsing
    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    // Try natural language parsing
    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(SlatedError::Validation(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

/// Parse a duration string into a chrono::Duration
fn parse_duration(input: &str) -> Result<Duration> {
    // humantime covers simple formats like "1h", "30m"
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| SlatedError::Validation("Duration out of range".to_string()));
    }

    Err(SlatedError::Validation(format!(
        "Could not parse duration: {}",
        input
    )))
}

/// Parse natural language time expression
fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| SlatedError::Validation(format!("Could not parse time: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_minutes() {
        let result = parse_schedule("30m");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_minutes();

        // Should be approximately 30 minutes from now (allow 1 minute tolerance)
        assert!(
            diff >= 29 && diff <= 31,
            "Expected ~30 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_duration_hours() {
        let result = parse_schedule("2h");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_minutes();

        assert!(
            diff >= 119 && diff <= 121,
            "Expected ~120 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_duration_days() {
        let result = parse_schedule("1d");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_hours();

        assert!(diff >= 23 && diff <= 25, "Expected ~24 hours, got {}", diff);
    }

    #[test]
    fn test_parse_duration_with_space() {
        let result = parse_schedule("1 hour");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_minutes();

        assert!(
            diff >= 59 && diff <= 61,
            "Expected ~60 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_tomorrow() {
        let result = parse_schedule("tomorrow");
        assert!(result.is_ok());

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_hours();

        // Should be approximately 24 hours from now (20-28 hours tolerance)
        assert!(diff >= 20 && diff <= 28, "Expected ~24 hours, got {}", diff);
    }

    #[test]
    fn test_parse_in_time() {
        let result = parse_schedule("in 2 hours");

        // "in X time" format may not be supported by all parsers
        if result.is_err() {
            let alt_result = parse_schedule("2 hours");
            assert!(alt_result.is_ok(), "Should parse '2 hours' format");
            return;
        }

        let scheduled_time = result.unwrap();
        let now = Utc::now();
        let diff = (scheduled_time - now).num_minutes();

        assert!(
            diff >= 119 && diff <= 121,
            "Expected ~120 minutes, got {}",
            diff
        );
    }

    #[test]
    fn test_parse_empty_string() {
        let result = parse_schedule("");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_invalid_format() {
        let result = parse_schedule("not a time");
        assert!(result.is_err());
    }
}
