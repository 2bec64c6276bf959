//! Date conversions for script dates
//!
//! Script dates are milliseconds since the Unix epoch (UTC). The textual form
//! is the RFC 3339 profile `YYYY-MM-DDTHH:MM:SS.mmmZ`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Largest time value a script date can hold (±100,000,000 days).
pub const MAX_TIME_MS: f64 = 8.64e15;

/// Formats a time value, `None` for NaN or out of range values.
pub fn format_iso8601(millis: f64) -> Option<String> {
    if !millis.is_finite() || millis.abs() > MAX_TIME_MS {
        return None;
    }
    let time = DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64)?;
    Some(time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
///
/// Fractions beyond milliseconds are truncated.
pub fn parse_iso8601(text: &str) -> Option<f64> {
    let text = text.trim();
    let millis = match DateTime::parse_from_rfc3339(text) {
        Ok(time) => time.timestamp_millis(),
        Err(_) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?
            .and_utc()
            .timestamp_millis(),
    };
    Some(millis as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_epoch_and_known_dates() {
        assert_eq!(format_iso8601(0.0).as_deref(), Some("1970-01-01T00:00:00.000Z"));
        assert_eq!(
            format_iso8601(470_106_123_456.0).as_deref(),
            Some("1984-11-24T01:02:03.456Z")
        );
        assert_eq!(format_iso8601(-1.0).as_deref(), Some("1969-12-31T23:59:59.999Z"));
        assert_eq!(format_iso8601(f64::NAN), None);
        assert_eq!(format_iso8601(MAX_TIME_MS * 2.0), None);
    }

    #[test]
    fn test_parse_accepts_offsets_and_fractions() {
        assert_eq!(parse_iso8601("1970-01-01T00:00:00Z"), Some(0.0));
        assert_eq!(parse_iso8601("1970-01-01T01:00:00+01:00"), Some(0.0));
        assert_eq!(parse_iso8601("1970-01-01T00:00:00.123456789Z"), Some(123.0));
        assert_eq!(parse_iso8601("1970-01-02"), Some(86_400_000.0));
        assert_eq!(
            parse_iso8601("1984-11-24T01:02:03.456Z"),
            Some(470_106_123_456.0)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_iso8601("yesterday"), None);
        assert_eq!(parse_iso8601("1970-13-01"), None);
        assert_eq!(parse_iso8601("1970-01-01T00:00:00"), None);
        assert_eq!(parse_iso8601("1970-01-01T00:00:00Zjunk"), None);
    }

    #[test]
    fn test_leap_day_round_trip() {
        let millis = parse_iso8601("2000-02-29T12:00:00Z").unwrap();
        assert_eq!(format_iso8601(millis).as_deref(), Some("2000-02-29T12:00:00.000Z"));
    }
}
