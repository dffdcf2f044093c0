//! Source timestamp parsing.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::source::RawTimestamp;

/// Naive layouts emitted by the backend (`isoformat()` without an offset).
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a wire timestamp into UTC.
///
/// Accepts RFC 3339, naive ISO 8601 (read as UTC) and epoch milliseconds,
/// either as a JSON number or as digits in a string.
pub fn parse_timestamp(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    match raw {
        RawTimestamp::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        RawTimestamp::Text(text) => parse_text(text.trim()),
    }
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    text.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis)
}
